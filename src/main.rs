fn main() {
    if let Err(err) = sheet_sql::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
