fn main() {
    std::process::exit(hostaudit::cli::run());
}
