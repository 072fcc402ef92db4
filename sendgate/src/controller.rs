use std::{future::Future, sync::Arc};

use sendgate_common::{RelayRegistry, Signal, internal, logging, tracing};
use sendgate_dispatch::{
    DispatchConfig, DispatchPipeline, DispatchWorker, MailTransport, RelaySelector, SmtpTransport,
    counter::CounterStore,
};
use sendgate_intake::{IntakePipeline, IntakeServer};
use sendgate_spool::{AttachmentStore, MailQueue};
use tokio::sync::broadcast;

use crate::Config;

/// The connected collaborators every service is built from.
#[derive(Debug, Clone)]
pub struct Components {
    pub registry: Arc<RelayRegistry>,
    pub counters: Arc<dyn CounterStore>,
    pub attachments: Arc<dyn AttachmentStore>,
    pub queue: Arc<dyn MailQueue>,
    pub selector: Arc<RelaySelector>,
}

impl Components {
    /// Connect every store named in `config`.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid or a store cannot be reached or
    /// initialised.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let registry = Arc::new(config.registry()?);
        let counters = config.counter_store.connect().await?;
        let attachments = config.attachments.clone().into_store()?;
        let queue = config.queue.clone().into_queue()?;

        let selector = Arc::new(RelaySelector::new(
            Arc::clone(&registry),
            Arc::clone(&counters),
            config.rate_limit.clone(),
        ));

        internal!(
            level = INFO,
            "Connected stores for {} relay(s), {} filtered domain(s)",
            registry.len(),
            config.filtered_domains.len()
        );

        Ok(Self {
            registry,
            counters,
            attachments,
            queue,
            selector,
        })
    }

    #[must_use]
    pub fn intake(&self) -> Arc<IntakePipeline> {
        Arc::new(IntakePipeline::new(
            Arc::clone(&self.attachments),
            Arc::clone(&self.queue),
        ))
    }

    #[must_use]
    pub fn dispatch(
        &self,
        config: &DispatchConfig,
        transport: Arc<dyn MailTransport>,
    ) -> Arc<DispatchPipeline> {
        Arc::new(DispatchPipeline::new(
            Arc::clone(&self.selector),
            Arc::clone(&self.attachments),
            transport,
            config.clone(),
        ))
    }
}

#[derive(Debug)]
pub struct Sendgate {
    config: Config,
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r?;
            internal!("CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    Ok(())
}

impl Sendgate {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the intake server and the dispatch worker until SIGINT or SIGTERM
    ///
    /// # Errors
    ///
    /// This function will return an error if a store cannot be connected or
    /// the intake server fails to bind.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` resolves, then stop both services gracefully.
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run), plus whatever `shutdown` or the intake server
    /// returns.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = anyhow::Result<()>>,
    ) -> anyhow::Result<()> {
        let Self { config } = self;
        internal!("Controller running");

        let components = Components::connect(&config).await?;
        let transport = Arc::new(SmtpTransport::new(
            config.dispatch.helo_domain.clone(),
            config.dispatch.smtp_timeouts.clone(),
        ));
        let worker = DispatchWorker::new(
            Arc::clone(&components.queue),
            components.dispatch(&config.dispatch, transport),
            &config.dispatch,
        );
        let server = IntakeServer::new(config.intake.clone(), components.intake()).await?;

        let (sender, _) = broadcast::channel(16);
        let mut stopped = sender.subscribe();
        let intake_shutdown = sender.subscribe();
        let worker_shutdown = sender.subscribe();

        let trigger = async {
            tokio::select! {
                r = shutdown => {
                    internal!("Shutting down...");
                    let _ = sender.send(Signal::Shutdown);
                    r
                }
                // A service already asked everyone to stop
                _ = stopped.recv() => Ok(()),
            }
        };

        let intake = async {
            let r = server.serve(intake_shutdown).await;
            if let Err(ref error) = r {
                tracing::error!(%error, "Intake server failed");
                let _ = sender.send(Signal::Shutdown);
            }
            r
        };

        let (signal, intake, ()) =
            tokio::join!(trigger, intake, worker.serve(worker_shutdown));

        internal!(level = INFO, "Shutdown complete");
        signal?;
        intake?;
        Ok(())
    }
}
