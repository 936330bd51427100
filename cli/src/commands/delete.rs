//! `chartops delete`: run a package's pre-delete commands, then helm delete.

use anyhow::Result;

pub async fn run(package: &str, custom_options: &[String]) -> Result<()> {
    let descriptor = super::load_descriptor(package)?;

    for command in &descriptor.pre_delete_command {
        if let Some((program, args)) = split_command(command) {
            println!("Running pre-delete command: {}", command);
            super::run_external(&program, &args, None).await?;
        }
    }

    let args = helm_delete_args(package, custom_options);
    super::run_external("helm", &args, None).await
}

/// `helm delete [custom...] <package>`
fn helm_delete_args(package: &str, custom_options: &[String]) -> Vec<String> {
    let mut args = vec!["delete".to_string()];
    args.extend(custom_options.iter().cloned());
    args.push(package.to_string());
    args
}

/// Splits a descriptor command line on whitespace into program and arguments.
/// Blank lines are skipped.
fn split_command(command: &str) -> Option<(String, Vec<String>)> {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((program, parts.collect()))
}
