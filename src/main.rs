fn main() {
    if let Err(err) = nfl_import::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
