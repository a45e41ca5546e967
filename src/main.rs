fn main() {
    if let Err(e) = hostsync::cli::run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
