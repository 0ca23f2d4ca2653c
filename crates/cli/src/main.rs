fn main() -> std::process::ExitCode {
    collecta_cli::run()
}
