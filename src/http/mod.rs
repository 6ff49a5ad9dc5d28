/*!
 * Blocking HTTP transport with bounded retries
 *
 * One long-lived connection pool serves every worker; response body
 * streams own their connection, so they must be drained or dropped
 * before the pool can reuse it.
 */

use std::io::Read;
use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{OssError, Result};
use crate::options::ClientOptions;

const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

pub struct Transport {
    client: reqwest::blocking::Client,
    max_retries: u32,
}

impl Transport {
    pub fn new(options: &ClientOptions) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(options.connect_timeout_secs))
            .timeout(Duration::from_secs(options.request_timeout_secs))
            .pool_max_idle_per_host(options.pool_max_idle_per_host)
            .build()
            .map_err(|e| OssError::Client(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            max_retries: options.max_retries,
        })
    }

    pub fn client(&self) -> &reqwest::blocking::Client {
        &self.client
    }

    /// Send a request, retrying transport failures and (for idempotent
    /// operations) 5xx responses with exponential backoff and jitter.
    ///
    /// `build` is called once per attempt; bodies are byte buffers, so
    /// rebuilding is cheap.
    pub fn execute<F>(&self, build: F, idempotent: bool) -> Result<reqwest::blocking::Response>
    where
        F: Fn() -> Result<reqwest::blocking::Request>,
    {
        let mut attempt: u32 = 0;
        loop {
            let request = build()?;
            let url = request.url().clone();

            match self.client.execute(request) {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() && idempotent && attempt < self.max_retries {
                        warn!(
                            status = status.as_u16(),
                            attempt, %url, "server error, retrying"
                        );
                        // Drain so the connection returns to the pool
                        drain(response);
                        attempt += 1;
                        thread::sleep(backoff(attempt));
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        debug!(error = %e, attempt, %url, "transport error, retrying");
                        attempt += 1;
                        thread::sleep(backoff(attempt));
                        continue;
                    }
                    return Err(OssError::Request(format!(
                        "request to {} failed after {} attempts: {}",
                        url,
                        attempt + 1,
                        e
                    )));
                }
            }
        }
    }
}

fn drain(mut response: reqwest::blocking::Response) {
    let mut sink = [0u8; 4096];
    while matches!(response.read(&mut sink), Ok(n) if n > 0) {}
}

fn backoff(attempt: u32) -> Duration {
    let exp = INITIAL_BACKOFF.saturating_mul(2u32.saturating_pow(attempt - 1));
    let capped = exp.min(MAX_BACKOFF);
    let jitter = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 4);
    capped + Duration::from_millis(jitter)
}
