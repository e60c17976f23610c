fn main() {
    if let Err(e) = ntal_dispatch::run() {
        eprintln!("ntal-dispatch: {e}");
        std::process::exit(1);
    }
}
