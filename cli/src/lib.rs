//! The `vibecodr` command line.
//!
//! ## Exit codes
//! - 0: success
//! - 1: failure
//! - 2: publish interrupted; the printed `retry-upload`/`retry-publish`
//!   command resumes it
//! - 3: sign-in required

mod bundle_dir;
mod commands;
mod report;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use tokio_util::sync::CancellationToken;
use vibecodr_publish::Visibility;

pub use bundle_dir::read_bundle_dir;
pub use commands::CommandError;
pub use commands::Context;
pub use commands::Output;
pub use report::recovery_hint;

#[derive(Debug, Parser)]
#[command(name = "vibecodr", version, about = "Publish web projects to vibecodr")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Credential file (must end in .json).
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Platform API base URL.
    #[arg(long = "api-base", global = true, value_name = "URL")]
    pub api_base: Option<String>,

    /// Log progress to stderr.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Output as JSON.
    #[arg(long, short = 'j', global = true)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Publish a directory as a new vibe.
    Publish(PublishArgs),
    /// Resume an interrupted upload into an existing capsule.
    RetryUpload(RetryUploadArgs),
    /// Publish a capsule whose files are already uploaded.
    RetryPublish(RetryPublishArgs),
    /// Show whether credentials are stored and when they expire.
    Status,
    /// Delete stored credentials.
    Logout,
}

#[derive(Debug, Args)]
pub struct PublishArgs {
    /// Directory holding the files to publish.
    pub dir: PathBuf,

    /// Title of the vibe.
    #[arg(long, short = 't')]
    pub title: String,

    /// Entry file, relative to `dir`.
    #[arg(long, short = 'e')]
    pub entry: Option<String>,

    /// Runner the player should use.
    #[arg(long)]
    pub runner: Option<String>,

    /// public, unlisted or private.
    #[arg(long, default_value = "public")]
    pub visibility: Visibility,
}

#[derive(Debug, Args)]
pub struct RetryUploadArgs {
    /// Directory holding the files to publish.
    pub dir: PathBuf,

    /// Capsule created by the interrupted publish.
    #[arg(long)]
    pub capsule: String,

    /// Paths already uploaded; repeat for each file.
    #[arg(long = "skip", value_name = "PATH")]
    pub skip: Vec<String>,

    /// public, unlisted or private.
    #[arg(long, default_value = "public")]
    pub visibility: Visibility,
}

#[derive(Debug, Args)]
pub struct RetryPublishArgs {
    /// Capsule whose files are all uploaded.
    #[arg(long)]
    pub capsule: String,

    /// public, unlisted or private.
    #[arg(long, default_value = "public")]
    pub visibility: Visibility,
}

impl Cli {
    /// Run the selected command, print its result and map it to an exit code.
    pub async fn run(self, cancel: CancellationToken) -> ExitCode {
        let json = self.global.json;
        match commands::execute(&self.global, &self.command, cancel).await {
            Ok(output) => {
                report::print_output(&output, json);
                ExitCode::SUCCESS
            }
            Err(err) => {
                report::print_failure(&err, &self.command, json);
                ExitCode::from(err.exit_code())
            }
        }
    }
}
