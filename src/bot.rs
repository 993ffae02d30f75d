//! Bot
//!
//! Owns the archive, the model and the follow-parity reconciler for the
//! configured account and implements the body of every scheduled job:
//! - `post_statement`: maybe post a generated statement
//! - `refresh_follow_parity`: follow back / unfollow
//! - `refresh_archive_and_model`: sync the archive, rebuild the model if it changed
//! - `poll_inbound`: answer mentions and DMs, run owner commands
//!
//! Every remote call goes through the shared [`CallWrapper`].

use anyhow::{Context, Result};
use rand::Rng;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::archive::ArchiveManager;
use crate::artifact::Artifact;
use crate::censor::Censor;
use crate::commands::{Command, Relation};
use crate::config::{Config, DelayRange};
use crate::model::{Model, ModelManager, ModelSlot, ModelState, TextModeler};
use crate::recovery::{CallStats, CallWrapper};
use crate::social::{AccountId, FollowParity, InboundEvent, InboundKind, SocialApi};
use crate::storage::Backends;

pub struct Bot {
    config: Config,
    api: Arc<dyn SocialApi>,
    calls: CallWrapper,
    censor: Censor,
    archive: Mutex<ArchiveManager>,
    models: Mutex<ModelManager>,
    /// Read side of `models`, never blocked by a rebuild
    model_slot: ModelSlot,
    modeler: Arc<dyn TextModeler>,
    parity: Mutex<FollowParity>,
    /// Newest inbound event seen; `None` until the first poll
    last_inbound: Mutex<Option<String>>,
}

impl Bot {
    /// Wire a bot from already-built managers
    pub fn new(
        config: Config,
        api: Arc<dyn SocialApi>,
        calls: CallWrapper,
        archive: ArchiveManager,
        models: ModelManager,
    ) -> Self {
        let censor = Censor::new(&config.banned_terms);
        let parity = FollowParity::new(api.clone(), calls.clone());
        let model_slot = models.slot();
        let modeler = models.modeler();

        Self {
            config,
            api,
            calls,
            censor,
            archive: Mutex::new(archive),
            models: Mutex::new(models),
            model_slot,
            modeler,
            parity: Mutex::new(parity),
            last_inbound: Mutex::new(None),
        }
    }

    /// Build the bot and its storage backends from configuration
    pub fn from_config(
        config: Config,
        api: Arc<dyn SocialApi>,
        modeler: Arc<dyn TextModeler>,
    ) -> Result<Self> {
        let calls = CallWrapper::new(config.call_policy());
        let source = config.source_username.clone();

        let archive_backends = Backends::from_config(&config, config.archive_path.clone())
            .context("Failed to set up archive storage")?;
        let model_backends = Backends::from_config(&config, config.model_path.clone())
            .context("Failed to set up model storage")?;

        let archive = ArchiveManager::new(
            &source,
            Artifact::new(ArchiveManager::file_name(&source), archive_backends, calls.clone()),
        )
        .with_upstream(api.clone());
        let models = ModelManager::new(
            Artifact::new(ModelManager::file_name(&source), model_backends, calls.clone()),
            modeler,
        );

        if config.remote_enabled() {
            info!("Remote storage enabled, artifacts mirrored remotely");
        } else {
            info!("No remote store configured, artifacts are local-only");
        }

        Ok(Self::new(config, api, calls, archive, models))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn call_stats(&self) -> CallStats {
        self.calls.stats()
    }

    pub async fn archive_len(&self) -> usize {
        self.archive.lock().await.archive().len()
    }

    pub async fn model_state(&self) -> ModelState {
        self.models.lock().await.state()
    }

    /// Initial load, sync and model build; any error here is fatal
    pub async fn startup(&self) -> Result<()> {
        let mut archive = self.archive.lock().await;
        archive.load(true).await.context("Failed to load archive")?;
        archive.sync().await.context("Failed to sync archive")?;

        let mut models = self.models.lock().await;
        models.load().await.context("Failed to load model")?;
        models
            .ensure_fresh(archive.archive())
            .await
            .context("Failed to build model")?;

        info!(
            "Started as {} mimicking {} ({} records, model {})",
            self.config.bot_name,
            self.config.source_username,
            archive.archive().len(),
            models.state().as_str()
        );
        Ok(())
    }

    /// Post a generated statement, subject to the configured chance
    pub async fn post_statement(&self) -> Result<()> {
        let roll: f64 = rand::thread_rng().gen();
        if roll >= self.config.tweet_chance {
            debug!("Skipping post this tick (chance {})", self.config.tweet_chance);
            return Ok(());
        }

        let (model, modeler) = self.model().await?;
        let text = modeler.generate(&model, self.config.max_post_length);
        if text.is_empty() {
            warn!("Model produced no statement, nothing posted");
            return Ok(());
        }
        self.post(&text).await
    }

    pub async fn refresh_follow_parity(&self) -> Result<()> {
        let report = self.parity.lock().await.reconcile().await?;
        if report.is_empty() {
            debug!("Follow parity already holds");
        }
        Ok(())
    }

    pub async fn refresh_archive_and_model(&self) -> Result<()> {
        info!("Refreshing archive/model...");
        let mut archive = self.archive.lock().await;
        archive.sync().await?;

        let mut models = self.models.lock().await;
        models.ensure_fresh(archive.archive()).await?;
        Ok(())
    }

    /// Handle mentions and DMs newer than the last poll
    ///
    /// The first poll only records the cursor so a restart doesn't answer
    /// the whole notification backlog.
    pub async fn poll_inbound(&self) -> Result<()> {
        let mut cursor = self.last_inbound.lock().await;
        let since = cursor.clone();
        let api = self.api.clone();

        let events = self
            .calls
            .fetch("fetch_inbound", || api.fetch_inbound(since.as_deref()))
            .await?;

        let Some(newest) = events.last().map(|e| e.id.clone()) else {
            return Ok(());
        };
        let first_poll = cursor.is_none();
        *cursor = Some(newest);
        drop(cursor);

        if first_poll {
            info!("Skipping {} inbound event(s) from before startup", events.len());
            return Ok(());
        }

        for event in &events {
            if let Err(e) = self.handle_event(event).await {
                warn!("Failed to handle {} from {}: {:#}", event.id, event.sender, e);
            }
        }
        Ok(())
    }

    /// Answer one inbound event
    pub async fn handle_event(&self, event: &InboundEvent) -> Result<()> {
        if event.sender.eq_ignore_ascii_case(&self.config.bot_name) {
            return Ok(());
        }
        if self.config.is_blacklisted(&event.sender) {
            info!("Ignoring blacklisted sender {}", event.sender);
            return Ok(());
        }

        let from_owner = event.sender.eq_ignore_ascii_case(&self.config.source_username);
        match event.kind {
            InboundKind::Direct if from_owner => {
                info!("[DM from owner] {}", event.text);
                self.run_command(event, Command::parse(&event.mentionless()))
                    .await
            }
            InboundKind::Direct => {
                self.delay(&self.config.dm_delay).await;
                self.respond_to(event, &event.mentionless()).await
            }
            InboundKind::Mention => {
                self.delay(&self.config.mention_delay).await;
                self.respond_to(event, &event.mentionless()).await
            }
        }
    }

    async fn run_command(&self, event: &InboundEvent, command: Command) -> Result<()> {
        match command {
            Command::Tweet { prompt } => {
                let (model, modeler) = self.model().await?;
                let text = modeler.respond(&model, &prompt, self.config.max_post_length);
                self.post(&text).await
            }
            Command::Relate { relation, handles } => self.relate(relation, &handles).await,
            Command::Mention { prefix } => {
                let (model, modeler) = self.model().await?;
                let prefix = format!("{} ", prefix);
                let limit = self
                    .config
                    .max_post_length
                    .saturating_sub(prefix.chars().count());
                let text = format!("{}{}", prefix, modeler.generate(&model, limit));
                self.post(&text).await
            }
            Command::Cheating { text } => self.post(&text).await,
            Command::Other { action } => {
                info!("No behavior for action: {}", action);
                self.respond_to(event, &event.mentionless()).await
            }
        }
    }

    /// Resolve handles and apply a bulk relationship call
    async fn relate(&self, relation: Relation, handles: &[String]) -> Result<()> {
        let api = self.api.clone();
        let mut ids: Vec<AccountId> = Vec::new();

        for handle in handles {
            let found = self
                .calls
                .fetch("lookup_account", || api.lookup_account(handle))
                .await?;
            match found {
                Some(id) => ids.push(id),
                None => warn!("Unknown account {}", handle),
            }
        }

        if ids.is_empty() {
            warn!("Nothing to {}", relation.as_str());
            return Ok(());
        }

        let outcome = match relation {
            Relation::Follow => self.calls.call("follow", || api.follow(&ids)).await?,
            Relation::Unfollow => self.calls.call("unfollow", || api.unfollow(&ids)).await?,
            Relation::Block => self.calls.call("block", || api.block(&ids)).await?,
        };
        if !outcome.is_already_applied() {
            info!("{} {} account(s)", relation.as_str(), ids.len());
        }
        Ok(())
    }

    async fn respond_to(&self, event: &InboundEvent, prompt: &str) -> Result<()> {
        let (model, modeler) = self.model().await?;
        let prefix = format!("@{} ", event.sender);
        let limit = self
            .config
            .max_post_length
            .saturating_sub(prefix.chars().count());

        let body = modeler.respond(&model, prompt, limit);
        if body.is_empty() {
            warn!("Model produced no reply for {}", event.sender);
            return Ok(());
        }
        self.reply(event, &format!("{}{}", prefix, body)).await
    }

    async fn post(&self, text: &str) -> Result<()> {
        let text = self.censor.obscure(text);
        let api = self.api.clone();
        let outcome = self.calls.call("post", || api.post(&text)).await?;
        if let Some(id) = outcome.into_value() {
            info!("Posted {}: {}", id, text);
        }
        Ok(())
    }

    async fn reply(&self, event: &InboundEvent, text: &str) -> Result<()> {
        let text = self.censor.obscure(text);
        let api = self.api.clone();
        let direct = event.kind == InboundKind::Direct;
        let outcome = self
            .calls
            .call("reply", || api.reply(&event.status_id, &text, direct))
            .await?;
        if let Some(id) = outcome.into_value() {
            info!("Replied {} to {}: {}", id, event.sender, text);
        }
        Ok(())
    }

    async fn model(&self) -> Result<(Arc<Model>, Arc<dyn TextModeler>)> {
        let model = self
            .model_slot
            .read()
            .await
            .clone()
            .context("No model loaded yet")?;
        Ok((model, self.modeler.clone()))
    }

    async fn delay(&self, range: &DelayRange) {
        let wait = range.sample();
        if !wait.is_zero() {
            debug!("Waiting {:?} before replying", wait);
            tokio::time::sleep(wait).await;
        }
    }
}
