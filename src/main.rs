fn main() -> std::process::ExitCode {
    bookweave_lib::run()
}
