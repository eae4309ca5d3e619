//! The `kwbridge` binary: runs the `.robot` suites below the root directory
//! in a runner session.

fn main() -> std::process::ExitCode {
    kwbridge_cli::Program::new().main()
}
