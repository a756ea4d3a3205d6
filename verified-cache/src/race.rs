// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! First-success racing across equivalent functions. */

use {
    crate::{
        error::{CacheError, Result},
        function::Function,
    },
    async_trait::async_trait,
    std::{sync::Arc, time::Instant},
    tokio::sync::mpsc,
};

/// Runs named entrants concurrently and resolves with the first success.
///
/// Losing entrants are left running as detached tasks so that slower
/// branches (typically the one populating a cold cache) still complete
/// their writes. If every entrant fails, the last error is returned.
pub struct Race<K, V> {
    name: String,
    entrants: Vec<(String, Arc<dyn Function<K, V>>)>,
}

impl<K, V> Race<K, V> {
    pub fn new(name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            entrants: Vec::new(),
        }
    }

    /// Add a named entrant.
    pub fn entrant(mut self, name: impl ToString, f: Arc<dyn Function<K, V>>) -> Self {
        self.entrants.push((name.to_string(), f));
        self
    }
}

#[async_trait]
impl<K, V> Function<K, V> for Race<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
{
    async fn call(&self, key: K) -> Result<V> {
        if self.entrants.is_empty() {
            return Err(CacheError::NoRaceEntrants);
        }

        let (tx, mut rx) = mpsc::channel(self.entrants.len());

        for (entrant, f) in &self.entrants {
            let tx = tx.clone();
            let f = f.clone();
            let key = key.clone();
            let race = self.name.clone();
            let entrant = entrant.clone();

            tokio::spawn(async move {
                let started = Instant::now();
                let result = f.call(key).await;

                match &result {
                    Ok(_) => tracing::debug!(
                        %race, %entrant, elapsed_ms = started.elapsed().as_millis() as u64,
                        "race entrant finished"
                    ),
                    Err(error) => tracing::debug!(%race, %entrant, %error, "race entrant failed"),
                }

                // The receiver is gone once a winner was picked.
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut last_error = CacheError::RaceEntrantLost;
        while let Some(result) = rx.recv().await {
            match result {
                Ok(value) => return Ok(value),
                Err(error) => last_error = error,
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::time::Duration};

    struct Delayed {
        delay: Duration,
        value: u64,
    }

    #[async_trait]
    impl Function<u64, u64> for Delayed {
        async fn call(&self, _key: u64) -> Result<u64> {
            tokio::time::sleep(self.delay).await;
            Ok(self.value)
        }
    }

    struct Failing;

    #[async_trait]
    impl Function<u64, u64> for Failing {
        async fn call(&self, _key: u64) -> Result<u64> {
            Err(CacheError::NoRaceEntrants)
        }
    }

    #[tokio::test]
    async fn fastest_entrant_wins() -> Result<()> {
        let race = Race::new("test")
            .entrant(
                "slow",
                Arc::new(Delayed {
                    delay: Duration::from_millis(200),
                    value: 1,
                }),
            )
            .entrant(
                "fast",
                Arc::new(Delayed {
                    delay: Duration::from_millis(1),
                    value: 2,
                }),
            );

        assert_eq!(race.call(0).await?, 2);

        Ok(())
    }

    #[tokio::test]
    async fn failure_does_not_mask_success() -> Result<()> {
        let race = Race::new("test")
            .entrant("failing", Arc::new(Failing))
            .entrant(
                "working",
                Arc::new(Delayed {
                    delay: Duration::from_millis(10),
                    value: 7,
                }),
            );

        assert_eq!(race.call(0).await?, 7);

        Ok(())
    }

    #[tokio::test]
    async fn all_failures_surface() {
        let race = Race::new("test")
            .entrant("a", Arc::new(Failing))
            .entrant("b", Arc::new(Failing));

        assert!(race.call(0).await.is_err());
    }

    #[tokio::test]
    async fn no_entrants_is_an_error() {
        let race: Race<u64, u64> = Race::new("empty");
        assert!(matches!(
            race.call(0).await,
            Err(CacheError::NoRaceEntrants)
        ));
    }
}
