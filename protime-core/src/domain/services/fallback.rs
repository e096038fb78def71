//! Ordered "try until one works" execution of remote requests.

use crate::domain::{
    ports::outbound::{RemoteRequest, RemoteResponse, Transport},
    AttemptFailure, FallbackError, TransportError,
};

/// The attempt of a chain that the remote API accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmed {
    /// Position of the accepted request in the chain.
    pub index: usize,
    pub request: RemoteRequest,
    pub response: RemoteResponse,
}

/// Send the requests of `chain` in order and stop at the first 2xx response.
///
/// Transport errors and non-2xx responses move on to the next request. When
/// every request fails the error lists all attempts in chain order.
pub async fn run_fallback<T: Transport + ?Sized>(
    transport: &T,
    chain: &[RemoteRequest],
) -> Result<Confirmed, FallbackError> {
    let mut attempts = Vec::with_capacity(chain.len());

    for (index, request) in chain.iter().enumerate() {
        let error = match transport.send(request).await {
            Ok(response) if response.is_success() => {
                tracing::debug!(attempt = index, "remote accepted {}", request);
                return Ok(Confirmed {
                    index,
                    request: request.clone(),
                    response,
                });
            }
            Ok(response) => TransportError::Status(response.status),
            Err(e) => e,
        };

        tracing::debug!(attempt = index, "remote rejected {}: {}", request, error);
        attempts.push(AttemptFailure {
            method: request.method.to_string(),
            path: request.target(),
            error,
        });
    }

    Err(FallbackError { attempts })
}
