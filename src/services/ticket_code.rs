//! Human-transcribable ticket numbers and the bounded collision retry used
//! when persisting them.

use std::future::Future;

use rand::Rng;

/// Restricted alphabet without the visually ambiguous 0/O/1/I.
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// How many fresh numbers to try before giving up on a single ticket.
pub const MAX_TICKET_NO_ATTEMPTS: u32 = 5;

/// Produces ticket numbers of the form `<PREFIX>-<code>`. Codes are
/// random, so they leak nothing about registration order or volume.
#[derive(Debug, Clone)]
pub struct TicketCodeGenerator {
    prefix: String,
    code_len: usize,
}

impl TicketCodeGenerator {
    pub fn new(prefix: impl Into<String>, code_len: usize) -> Self {
        Self {
            prefix: prefix.into(),
            code_len,
        }
    }

    pub fn make_ticket_no(&self) -> String {
        let mut rng = rand::thread_rng();
        let code: String = (0..self.code_len)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        format!("{}-{}", self.prefix, code)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UniqueRetryError<E> {
    #[error("no unique ticket number after {0} attempts")]
    AttemptsExhausted(u32),

    #[error(transparent)]
    Persist(E),
}

/// Bounded retry around a generate-then-persist pair: regenerates and
/// retries while `is_collision` classifies the persist error as a
/// uniqueness conflict, up to `max_attempts`. Any other error aborts
/// immediately. Exhaustion fails this one unit of work, never the caller's
/// whole batch.
pub async fn with_unique_retry<T, E, Fut>(
    max_attempts: u32,
    mut generate: impl FnMut() -> String,
    mut persist: impl FnMut(String) -> Fut,
    is_collision: impl Fn(&E) -> bool,
) -> Result<T, UniqueRetryError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    for attempt in 0..max_attempts {
        let candidate = generate();
        match persist(candidate).await {
            Ok(v) => return Ok(v),
            Err(e) if is_collision(&e) => {
                tracing::debug!(attempt, "ticket number collision, regenerating");
                continue;
            }
            Err(e) => return Err(UniqueRetryError::Persist(e)),
        }
    }
    Err(UniqueRetryError::AttemptsExhausted(max_attempts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn format_and_alphabet() {
        let gen = TicketCodeGenerator::new("NM25", 4);
        for _ in 0..200 {
            let no = gen.make_ticket_no();
            let (prefix, code) = no.split_once('-').expect("prefix-code format");
            assert_eq!(prefix, "NM25");
            assert_eq!(code.len(), 4);
            assert!(code.bytes().all(|b| ALPHABET.contains(&b)));
            for ambiguous in ['0', 'O', '1', 'I'] {
                assert!(!code.contains(ambiguous));
            }
        }
    }

    #[test]
    fn codes_vary() {
        let gen = TicketCodeGenerator::new("NM25", 6);
        let codes: HashSet<String> = (0..100).map(|_| gen.make_ticket_no()).collect();
        assert!(codes.len() > 90);
    }

    #[tokio::test]
    async fn retry_succeeds_after_collisions() {
        let mut remaining_collisions = 3u32;
        let result: Result<String, _> = with_unique_retry(
            5,
            || "NM25-AAAA".to_string(),
            |candidate| {
                let collide = remaining_collisions > 0;
                if collide {
                    remaining_collisions -= 1;
                }
                async move {
                    if collide {
                        Err("collision")
                    } else {
                        Ok(candidate)
                    }
                }
            },
            |e| *e == "collision",
        )
        .await;
        assert_eq!(result.unwrap(), "NM25-AAAA");
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let result: Result<(), _> = with_unique_retry(
            5,
            || "NM25-AAAA".to_string(),
            |_| async { Err("collision") },
            |e| *e == "collision",
        )
        .await;
        assert!(matches!(result, Err(UniqueRetryError::AttemptsExhausted(5))));
    }

    #[tokio::test]
    async fn retry_propagates_other_errors() {
        let result: Result<(), _> = with_unique_retry(
            5,
            || "NM25-AAAA".to_string(),
            |_| async { Err("io") },
            |e| *e == "collision",
        )
        .await;
        assert!(matches!(result, Err(UniqueRetryError::Persist("io"))));
    }
}
