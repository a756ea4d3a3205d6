// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Request-scoped TTL overrides.

Storage implementations interpret a zero TTL as "whatever the current
request scope asks for, else the default". The scope is carried in a
task-local so a caller fetching a content-addressed URL can extend the
cache lifetime without a dedicated code path:

```ignore
let bytes = scope::with_ttl(scope::CONTENT_ADDRESSED_TTL, fetcher.call(url)).await?;
```
*/

use std::{future::Future, time::Duration};

/// TTL applied when neither the caller nor the scope specifies one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// TTL for resources whose URL embeds their content digest.
pub const CONTENT_ADDRESSED_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

tokio::task_local! {
    static TTL_OVERRIDE: Duration;
}

/// Run a future with a scoped TTL override installed.
///
/// Storage `set` calls made with a zero TTL anywhere below `fut` will
/// use `ttl` instead of [DEFAULT_TTL].
pub async fn with_ttl<F>(ttl: Duration, fut: F) -> F::Output
where
    F: Future,
{
    TTL_OVERRIDE.scope(ttl, fut).await
}

/// Resolve a requested TTL against the current scope.
///
/// Nonzero TTLs pass through untouched. A zero TTL resolves to the
/// scoped override if one is installed, else [DEFAULT_TTL].
pub fn resolve(requested: Duration) -> Duration {
    if !requested.is_zero() {
        return requested;
    }

    TTL_OVERRIDE.try_with(|ttl| *ttl).unwrap_or(DEFAULT_TTL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_ttl_wins() {
        assert_eq!(resolve(Duration::from_secs(1)), Duration::from_secs(1));
    }

    #[test]
    fn unscoped_zero_resolves_to_default() {
        assert_eq!(resolve(Duration::ZERO), DEFAULT_TTL);
    }

    #[tokio::test]
    async fn scoped_zero_resolves_to_override() {
        let resolved = with_ttl(CONTENT_ADDRESSED_TTL, async { resolve(Duration::ZERO) }).await;
        assert_eq!(resolved, CONTENT_ADDRESSED_TTL);

        // The override does not leak past the scope.
        assert_eq!(resolve(Duration::ZERO), DEFAULT_TTL);
    }
}
