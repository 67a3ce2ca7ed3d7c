use std::collections::HashSet;

use crate::models::{FeedHistory, MovieRecord};

/// Outcome of merging one batch into a feed's history
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub history: FeedHistory,
    pub added: usize,
    pub duplicates: usize,
}

/// Folds a freshly normalized batch into the existing history.
///
/// Records whose identity is already known (from history or earlier in the
/// same batch) are discarded, so the first-seen data wins and merging the
/// same batch twice changes nothing. The result is ordered by `date_added`
/// descending; the sort is stable, so equal timestamps keep existing records
/// ahead of new ones and new ones in the order the feed listed them.
pub fn reconcile(existing: FeedHistory, fresh: Vec<MovieRecord>) -> Reconciled {
    let FeedHistory { feed_id, mut movies } = existing;
    let mut seen: HashSet<String> = movies.iter().map(|m| m.identity.clone()).collect();

    let mut added = 0;
    let mut duplicates = 0;
    for movie in fresh {
        if seen.insert(movie.identity.clone()) {
            movies.push(movie);
            added += 1;
        } else {
            duplicates += 1;
        }
    }

    movies.sort_by(|a, b| b.date_added.cmp(&a.date_added));

    Reconciled {
        history: FeedHistory { feed_id, movies },
        added,
        duplicates,
    }
}

/// Drops everything past the newest `limit` records. Only applied when a
/// storage cap is configured; history is unbounded otherwise.
pub fn apply_retention(history: &mut FeedHistory, limit: Option<usize>) -> usize {
    match limit {
        Some(limit) if history.movies.len() > limit => {
            let dropped = history.movies.len() - limit;
            history.movies.truncate(limit);
            dropped
        }
        _ => 0,
    }
}

/// Leaves out fresh records that a full history would prune straight away:
/// anything not newer than the oldest record kept under `limit`.
pub fn skip_beyond_cap(
    existing: &FeedHistory,
    fresh: Vec<MovieRecord>,
    limit: Option<usize>,
) -> Vec<MovieRecord> {
    let Some(limit) = limit else {
        return fresh;
    };
    if limit == 0 {
        return Vec::new();
    }
    match existing.movies.get(limit - 1) {
        Some(floor) => fresh
            .into_iter()
            .filter(|m| m.date_added > floor.date_added)
            .collect(),
        None => fresh,
    }
}
