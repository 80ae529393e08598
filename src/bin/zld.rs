//! The actual executable entry point (§6 "CLI (driver multiplexer)"). Thin
//! enough to be a transcription of `driver.rs`'s dispatch result into a
//! process exit code, the way the teacher's own example binaries
//! (`rewrite_pe.rs`) keep `main()` to argument handling plus a single call
//! into the library.

use std::process::ExitCode;

use zld::driver::{self, Dispatch};
use zld::Linker;

fn main() -> ExitCode {
    let mut args = std::env::args();
    let argv0 = args.next().unwrap_or_else(|| "zld".to_string());
    let rest: Vec<String> = args.collect();

    match driver::dispatch_backend(&argv0) {
        Dispatch::Usage => {
            println!("{}", driver::USAGE);
            ExitCode::SUCCESS
        }
        Dispatch::UnsupportedFormat => {
            eprintln!("zld: COFF output is not supported by this build");
            ExitCode::FAILURE
        }
        Dispatch::Run(format) => run(format, &rest),
    }
}

fn run(format: zld::options::Format, args: &[String]) -> ExitCode {
    let (options, verbosity) = match driver::parse_options(format, args) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("zld: {err}");
            return ExitCode::FAILURE;
        }
    };

    // SPEC_FULL §4 "`--verbose`/`RUST_LOG` wiring": the teacher's own
    // example binaries (`rewrite_pe.rs`) reach for `stderrlog` rather than
    // rolling a logger by hand; `-v`/`-vv` bumps past the default `warn`
    // level one `log` level at a time.
    let _ = stderrlog::new().verbosity(verbosity as usize).init();

    let emit_path = options.emit.directory.join(&options.emit.sub_path);
    if let Some(parent) = emit_path.parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
    let mut linker = Linker::new(options);
    match linker.link() {
        Ok(bytes) => {
            for warning in linker.diagnostics().warnings() {
                eprintln!("zld: warning: {warning}");
            }
            if let Err(err) = std::fs::write(&emit_path, &bytes) {
                eprintln!("zld: failed to write {}: {}", emit_path.display(), err);
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("zld: {err}");
            ExitCode::FAILURE
        }
    }
}
