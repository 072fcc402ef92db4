//! Intake HTTP server

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use sendgate_common::{Attachment, MailRequest, Signal, tracing};
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

use crate::{IntakeConfig, IntakeError, IntakePipeline, ServerError};

/// Intake HTTP server
///
/// Accepts `POST /mail` as `multipart/form-data` with the text fields
/// `From`, `To`, `Subject` and `Body`, and any number of file parts.
pub struct IntakeServer {
    listener: TcpListener,
    router: Router,
}

/// The intake routes with their layers applied.
pub fn router(config: &IntakeConfig, pipeline: Arc<IntakePipeline>) -> Router {
    Router::new()
        .route("/mail", post(enqueue_handler))
        .with_state(pipeline)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TimeoutLayer::new(config.request_timeout()))
}

impl IntakeServer {
    /// Create a new intake server
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn new(
        config: IntakeConfig,
        pipeline: Arc<IntakePipeline>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| ServerError::BindError {
                address: config.listen_address.clone(),
                source: e,
            })?;

        tracing::info!(
            address = %config.listen_address,
            "Intake server bound successfully"
        );

        Ok(Self {
            listener,
            router: router(&config, pipeline),
        })
    }

    /// The bound address, useful when listening on port 0
    ///
    /// # Errors
    ///
    /// If the socket's address cannot be read
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the intake server until shutdown signal is received
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), ServerError> {
        tracing::info!("Intake server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Intake server received shutdown signal");
            })
            .await
            .map_err(|e| ServerError::ServerError(e.to_string()))?;

        tracing::info!("Intake server stopped");
        Ok(())
    }
}

/// Collect the form into a [`MailRequest`].
///
/// Field names match case-insensitively and the first occurrence of a field
/// wins. Parts carrying a filename are attachments whatever their name.
async fn read_form(mut multipart: Multipart) -> Result<MailRequest, MultipartError> {
    let mut request = MailRequest::default();

    while let Some(field) = multipart.next_field().await? {
        if let Some(filename) = field.file_name().map(ToString::to_string) {
            let data = field.bytes().await?;
            request.attachments.push(Attachment::new(filename, data.to_vec()));
            continue;
        }

        let name = field.name().map(str::to_ascii_lowercase);
        let slot = match name.as_deref() {
            Some("from") => &mut request.from,
            Some("to") => &mut request.to,
            Some("subject") => &mut request.subject,
            Some("body") => &mut request.body,
            other => {
                tracing::debug!(field = ?other, "Ignoring unknown form field");
                continue;
            }
        };

        let value = field.text().await?;
        slot.get_or_insert(value);
    }

    Ok(request)
}

/// `POST /mail`
async fn enqueue_handler(
    State(pipeline): State<Arc<IntakePipeline>>,
    multipart: Multipart,
) -> Response {
    let request = match read_form(multipart).await {
        Ok(request) => request,
        Err(error) => {
            tracing::warn!(%error, "Malformed intake request");
            return (error.status(), error.body_text()).into_response();
        }
    };

    match pipeline.submit(request).await {
        Ok(_) => (StatusCode::OK, "Enqueue mail success.").into_response(),
        Err(error @ IntakeError::MissingField(_)) => {
            (StatusCode::BAD_REQUEST, error.to_string()).into_response()
        }
        Err(error @ IntakeError::StorageUnavailable(_)) => {
            tracing::error!(%error, "Failed to enqueue mail");
            (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response()
        }
    }
}
