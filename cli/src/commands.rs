use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vibecodr_common::Settings;
use vibecodr_common::SettingsLoader;
use vibecodr_login::CredentialManager;
use vibecodr_login::CredentialStatus;
use vibecodr_login::CredentialStore;
use vibecodr_login::GetTokenOptions;
use vibecodr_login::LoginError;
use vibecodr_net::NetError;
use vibecodr_net::OriginAllowlist;
use vibecodr_net::ResilienceOptions;
use vibecodr_net::ResilientClient;
use vibecodr_publish::PlatformApi;
use vibecodr_publish::PublishError;
use vibecodr_publish::PublishOutcome;
use vibecodr_publish::PublishRequest;
use vibecodr_publish::Publisher;
use vibecodr_publish::Recovery;

use crate::Command;
use crate::GlobalArgs;
use crate::bundle_dir::read_bundle_dir;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Login(#[from] LoginError),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error("{0:#}")]
    Setup(anyhow::Error),
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::Publish(err) => err.kind(),
            CommandError::Login(err) => err.kind(),
            CommandError::Net(err) => err.kind(),
            CommandError::Setup(_) => "SETUP_FAILED",
        }
    }

    pub fn requires_sign_in(&self) -> bool {
        match self {
            CommandError::Login(err) => err.requires_sign_in(),
            CommandError::Publish(err) => {
                matches!(err.innermost(), PublishError::Auth(login) if login.requires_sign_in())
            }
            _ => false,
        }
    }

    pub fn exit_code(&self) -> u8 {
        if self.requires_sign_in() {
            return 3;
        }
        match self {
            CommandError::Publish(err) if err.recovery() != Recovery::None => 2,
            _ => 1,
        }
    }
}

/// What a successful command produced.
#[derive(Debug)]
pub enum Output {
    Published(PublishOutcome),
    Status {
        path: PathBuf,
        status: CredentialStatus,
    },
    LoggedOut {
        path: PathBuf,
        removed: bool,
    },
}

/// Everything a command needs, resolved once from settings and flags.
pub struct Context {
    settings: Settings,
    store: CredentialStore,
    client: ResilientClient,
    allowlist: OriginAllowlist,
    cancel: CancellationToken,
}

impl Context {
    pub fn load(global: &GlobalArgs, cancel: CancellationToken) -> Result<Self, CommandError> {
        let settings = SettingsLoader::new()
            .load()
            .context("failed to load settings")
            .map_err(CommandError::Setup)?;
        Self::from_settings(settings, global, cancel)
    }

    /// Flags take precedence over `settings`.
    pub fn from_settings(
        mut settings: Settings,
        global: &GlobalArgs,
        cancel: CancellationToken,
    ) -> Result<Self, CommandError> {
        if let Some(path) = &global.config {
            settings.credentials_path = Some(path.clone());
        }
        if let Some(api_base) = &global.api_base {
            settings.api_base = api_base.clone();
        }

        let store = CredentialStore::open(settings.credentials_path.as_deref())?;
        let client = ResilientClient::new(ResilienceOptions::from_millis(
            settings.timeout_ms,
            settings.max_retries,
            settings.base_delay_ms,
        ))?;
        let allowlist = settings
            .extra_api_origins
            .iter()
            .fold(OriginAllowlist::default(), |list, origin| {
                list.with_api_origin(origin)
            });
        let allowlist = settings
            .extra_player_origins
            .iter()
            .fold(allowlist, |list, origin| list.with_player_origin(origin));

        Ok(Self {
            settings,
            store,
            client,
            allowlist,
            cancel,
        })
    }

    fn manager(&self) -> CredentialManager {
        CredentialManager::with_defaults(
            self.store.clone(),
            self.client.clone(),
            self.allowlist.clone(),
            GetTokenOptions {
                api_base: Some(self.settings.api_base.clone()),
                min_valid_seconds: i64::try_from(self.settings.min_valid_seconds)
                    .unwrap_or(i64::MAX),
                force_refresh: false,
            },
        )
    }

    fn publisher(&self) -> Result<Publisher, CommandError> {
        let api = PlatformApi::new(
            self.client.clone(),
            self.allowlist.clone(),
            &self.settings.api_base,
        )?
        .with_cancellation(self.cancel.clone());
        let publisher = Publisher::new(api, Arc::new(self.manager()))
            .with_player_base(&self.allowlist, &self.settings.player_base)?;
        Ok(publisher)
    }
}

/// Load the context and run `command`.
pub async fn execute(
    global: &GlobalArgs,
    command: &Command,
    cancel: CancellationToken,
) -> Result<Output, CommandError> {
    let context = Context::load(global, cancel)?;
    dispatch(&context, command).await
}

pub async fn dispatch(context: &Context, command: &Command) -> Result<Output, CommandError> {
    match command {
        Command::Publish(args) => {
            let files = read_bundle_dir(&args.dir).map_err(CommandError::Setup)?;
            info!(dir = %args.dir.display(), files = files.len(), "publishing bundle");
            let request = PublishRequest {
                title: args.title.clone(),
                files,
                entry: args.entry.clone(),
                runner: args.runner.clone(),
                visibility: args.visibility,
            };
            let outcome = context.publisher()?.publish(&request).await?;
            Ok(Output::Published(outcome))
        }
        Command::RetryUpload(args) => {
            let files = read_bundle_dir(&args.dir).map_err(CommandError::Setup)?;
            let outcome = context
                .publisher()?
                .retry_upload(&args.capsule, &files, &args.skip, args.visibility)
                .await?;
            Ok(Output::Published(outcome))
        }
        Command::RetryPublish(args) => {
            let outcome = context
                .publisher()?
                .retry_publish(&args.capsule, args.visibility)
                .await?;
            Ok(Output::Published(outcome))
        }
        Command::Status => Ok(Output::Status {
            path: context.store.path().to_path_buf(),
            status: context.manager().status()?,
        }),
        Command::Logout => {
            let removed = context.manager().clear()?;
            info!(removed, "credentials cleared");
            Ok(Output::LoggedOut {
                path: context.store.path().to_path_buf(),
                removed,
            })
        }
    }
}
