fn main() {
    if let Err(err) = xlsx_fill::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
