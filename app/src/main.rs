fn main() {
    if let Err(err) = chain_orchestrator::run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
