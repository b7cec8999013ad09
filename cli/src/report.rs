//! Human and JSON rendering of command results.

use std::path::Path;

use chrono::DateTime;
use serde::Serialize;
use serde_json::json;
use vibecodr_publish::PublishError;
use vibecodr_publish::PublishStep;
use vibecodr_publish::Recovery;
use vibecodr_publish::Visibility;

use crate::Command;
use crate::commands::CommandError;
use crate::commands::Output;

pub(crate) fn print_output(output: &Output, json: bool) {
    if json {
        let value = match output {
            Output::Published(outcome) => json!(outcome),
            Output::Status { path, status } => json!({
                "path": path.display().to_string(),
                "hasCredentials": status.has_credentials,
                "expiresAt": status.expires_at,
                "isExpired": status.is_expired,
            }),
            Output::LoggedOut { path, removed } => json!({
                "path": path.display().to_string(),
                "removed": removed,
            }),
        };
        println!("{value:#}");
        return;
    }

    match output {
        Output::Published(outcome) => {
            println!("Published {}", outcome.url);
            println!("  capsule: {}", outcome.capsule_id);
            println!("  post:    {}", outcome.post_id);
        }
        Output::Status { path, status } => {
            if !status.has_credentials {
                println!("Not signed in (no credentials at {})", path.display());
            } else if status.is_expired {
                println!(
                    "Signed in; platform token expired{} and will be refreshed on next use",
                    format_expiry(status.expires_at)
                );
            } else {
                println!(
                    "Signed in; platform token valid until{}",
                    format_expiry(status.expires_at)
                );
            }
        }
        Output::LoggedOut { path, removed } => {
            if *removed {
                println!("Removed credentials at {}", path.display());
            } else {
                println!("No credentials stored at {}", path.display());
            }
        }
    }
}

fn format_expiry(expires_at: Option<i64>) -> String {
    expires_at
        .and_then(|at| DateTime::from_timestamp(at, 0))
        .map(|at| format!(" {}", at.to_rfc3339()))
        .unwrap_or_default()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FailureReport<'a> {
    success: bool,
    error: ErrorReport<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorReport<'a> {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cause: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<PublishStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    capsule_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uploaded_paths: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    all_files_uploaded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    recovery: Option<Recovery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

pub(crate) fn print_failure(err: &CommandError, command: &Command, json: bool) {
    let hint = match err {
        CommandError::Publish(publish) => recovery_hint(publish, command),
        _ => None,
    }
    .or_else(|| {
        err.requires_sign_in()
            .then(|| "sign in to vibecodr again, then rerun this command".to_string())
    });

    if json {
        let failure = match err {
            CommandError::Publish(publish) => publish.failure(),
            _ => None,
        };
        let cause = match err {
            CommandError::Publish(publish @ PublishError::Incomplete(_)) => {
                Some(publish.innermost().kind())
            }
            _ => None,
        };
        let report = FailureReport {
            success: false,
            error: ErrorReport {
                code: err.code(),
                message: err.to_string(),
                cause,
                step: failure.map(|f| f.step),
                capsule_id: failure.and_then(|f| f.capsule_id.as_deref()),
                uploaded_paths: failure.map(|f| f.uploaded_paths.as_slice()),
                all_files_uploaded: failure.map(|f| f.all_files_uploaded),
                recovery: failure.map(|f| f.recovery),
                hint,
            },
        };
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{text}"),
            Err(_) => eprintln!("error: {err}"),
        }
        return;
    }

    eprintln!("error: {err}");
    if let Some(hint) = hint {
        eprintln!("hint: {hint}");
    }
}

/// The command that resumes an interrupted publish, if it can be resumed.
pub fn recovery_hint(err: &PublishError, command: &Command) -> Option<String> {
    let failure = err.failure()?;
    let capsule = failure.capsule_id.as_deref()?;
    let (dir, visibility) = match command {
        Command::Publish(args) => (Some(args.dir.as_path()), args.visibility),
        Command::RetryUpload(args) => (Some(args.dir.as_path()), args.visibility),
        Command::RetryPublish(args) => (None, args.visibility),
        Command::Status | Command::Logout => return None,
    };

    let mut words = match failure.recovery {
        Recovery::None => return None,
        Recovery::RetryUpload => {
            let mut words = vec![
                "vibecodr".to_string(),
                "retry-upload".to_string(),
                shell_word(&dir.map(Path::display)?.to_string()),
                "--capsule".to_string(),
                shell_word(capsule),
            ];
            for path in &failure.uploaded_paths {
                words.push("--skip".to_string());
                words.push(shell_word(path));
            }
            words
        }
        Recovery::RetryPublish => vec![
            "vibecodr".to_string(),
            "retry-publish".to_string(),
            "--capsule".to_string(),
            shell_word(capsule),
        ],
    };
    if visibility != Visibility::Public {
        words.push("--visibility".to_string());
        words.push(visibility.to_string());
    }
    Some(words.join(" "))
}

fn shell_word(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@%+=,".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
