use crate::error::{LuksError, LuksResult};
use log::debug;
use std::thread::sleep;
use std::time::Duration;

/// Run `op` up to `attempts` times, sleeping `delay` between failures.
pub fn with_retries<T, F>(what: &str, attempts: u32, delay: Duration, mut op: F) -> LuksResult<T>
where
    F: FnMut() -> LuksResult<T>,
{
    let attempts = attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= attempts {
                    if attempts == 1 {
                        return Err(err);
                    }
                    return Err(LuksError::RetryExhausted {
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
                debug!("{what}: attempt {attempt}/{attempts} failed: {err}");
                sleep(delay);
            }
        }
    }
}
