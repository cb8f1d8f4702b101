//! Flash command implementation

use crate::cli::FlashArgs;
use boardflash_flash::{
    BackendRegistry, FlashConfig, FlashRequest, FlashStatus, Flasher, InterruptKind,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Flash the boards selected by `args` and return the exit code
pub fn run_flash(
    registry: BackendRegistry,
    config: &FlashConfig,
    args: &FlashArgs,
) -> Result<i32, Box<dyn std::error::Error>> {
    let flasher = Flasher::from_config(registry, config)?;

    let cancel = flasher.cancel_token();
    if let Err(e) = ctrlc::set_handler(move || cancel.cancel(InterruptKind::User)) {
        log::warn!("Failed to install Ctrl-C handler: {}", e);
    }

    let request = build_request(args);

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );
    pb.set_message(format!("Flashing {}", args.input.display()));
    pb.enable_steady_tick(Duration::from_millis(100));

    let result = flasher.flash(&request);
    pb.finish_and_clear();

    let status = result?;
    print_summary(&status);
    Ok(status.exit_code())
}

fn build_request(args: &FlashArgs) -> FlashRequest {
    let mut request = FlashRequest::new(&args.input)
        .method(&args.method)
        .no_reset(args.no_reset);

    request = match args.target_ids.as_slice() {
        [] => request,
        [single] => request.target_id(single.clone()),
        many => request.target_ids(many.to_vec()),
    };
    if let Some(platform) = &args.platform {
        request = request.platform(platform.clone());
    }
    if let Some(flasher) = &args.flasher {
        request = request.backend(flasher.clone());
    }
    request
}

fn print_summary(status: &FlashStatus) {
    match status {
        FlashStatus::Single(outcome) => println!("Result: {} ({})", outcome, outcome.code()),
        FlashStatus::Batch(report) => {
            if let Some(refusal) = report.refusal() {
                println!("Result: {} ({})", refusal, refusal.code());
                return;
            }
            for result in report.results() {
                println!("  {:<48} {}", result.target_id, result.outcome);
            }
            println!(
                "Flashed {}/{} devices (status {})",
                report.passed(),
                report.results().len(),
                report.status()
            );
        }
    }
}
