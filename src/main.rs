use std::process::ExitCode;

use clap::Parser;
use time::UtcOffset;

use wearlink::{Args, Backend, RunOptions, run_with_options};

fn main() -> ExitCode {
    let args = Args::parse();
    // The local offset can only be read soundly before worker threads exist.
    let utc_offset = UtcOffset::current_local_offset().ok();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("error: failed to start the async runtime: {error}");
            return ExitCode::from(1);
        }
    };

    let run_result = runtime.block_on(async {
        let options = RunOptions::builder()
            .maybe_log_level(args.log_level())
            .maybe_output_format(args.output_format())
            .maybe_store_path(args.store_path())
            .maybe_utc_offset(utc_offset)
            .build();
        let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
        let mut stdout = std::io::stdout();

        run_with_options(command, &mut stdout, Backend::from(maybe_fake_args), options).await
    });

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
