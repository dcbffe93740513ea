const USAGE: &str = "\
OTA Update Server — over-the-air distribution of mobile app builds

USAGE:
    ota [OPTIONS]

OPTIONS:
    -h, --help           Print this help message and exit
    -v, --version        Print version and exit

REQUIRED ENVIRONMENT VARIABLES:
    OTA_CREDENTIALS              Service credentials: inline JSON or a file path
    OTA_DATABASE_URL             Version registry base URL
    OTA_STORAGE_URL              Blob store base URL
    OTA_STORAGE_BUCKET           Blob store bucket name

NETWORK (listen addresses, default shown):
    OTA_LISTEN                   OTA API              [:8080]
    OTA_METRICS_LISTEN           Prometheus metrics   [:9100]

OTHER:
    OTA_UPLOAD_TIMEOUT_SECONDS   Upload wall-clock budget  [600]
    OTA_LOG_LEVEL                Log level                 [info]
";

pub fn print_usage() {
    print!("{USAGE}");
}

pub fn print_version(version: &str) {
    println!("ota {version}");
}

fn handle_cli_flags_from_args(args: &[String], version: &str) -> bool {
    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                return true;
            }
            "-v" | "--version" => {
                print_version(version);
                return true;
            }
            _ => {}
        }
    }
    false
}

/// Check CLI args for --help/-h or --version/-v.
/// Returns `true` if a flag was handled (caller should exit).
pub fn handle_cli_flags(version: &str) -> bool {
    let args: Vec<String> = std::env::args().skip(1).collect();
    handle_cli_flags_from_args(&args, version)
}
