//! The periodic watchdog pass (spec.md §4.9): idle-client detection, zombie
//! reclamation, workbase retirement, and a metrics-snapshot trigger, all
//! run from one `≥1 Hz` timer tick.
//!
//! Grounded in `tos_daemon`'s periodic-task shape (a timer loop calling a
//! handful of independent, individually-fallible maintenance steps each
//! tick, logging but never aborting the loop on a single step's failure) —
//! this module only owns the pure per-tick logic; the actual timer loop
//! driving it is wiring left to the binary that assembles this core with
//! its out-of-scope connector (spec.md §1).

use log::{debug, trace};

use pool_common::time::TimestampSeconds;

use crate::registry::ClientRegistry;
use crate::workbase::WorkbaseManager;

/// What one watchdog pass did, for logging/metrics — never used for control
/// flow, since every step here is independently safe to skip a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatchdogReport {
    pub idle_marked: usize,
    pub zombies_removed: usize,
}

/// Mark every client idle longer than `dropidle` seconds for drop (spec.md
/// §4.9: "if `dropidle > 0` and `now - last_share > dropidle`, mark for
/// drop"). `dropidle == 0` disables idle dropping entirely (spec.md §6).
/// A client that has never submitted a share (`last_share_at() == 0`) is
/// exempt — it has had no opportunity to go idle yet, and `now` will always
/// exceed a zero timestamp by more than any reasonable `dropidle`, which
/// would otherwise drop every freshly connected client on the first tick.
pub fn mark_idle_clients(registry: &ClientRegistry, dropidle_secs: u64, now: TimestampSeconds) -> usize {
    if dropidle_secs == 0 {
        return 0;
    }
    let mut marked = 0;
    for client in registry.all_clients() {
        // Pinned for the duration of this client's inspection: the snapshot
        // from `all_clients` escapes the registry lock, so a concurrent
        // zombie sweep must not treat this client as unreferenced while the
        // watchdog is still looking at it.
        client.pin();
        let last_share = client.last_share_at();
        if last_share != 0 && !client.is_dropped() && now.saturating_sub(last_share) > dropidle_secs {
            client.mark_dropped();
            marked += 1;
            trace!("watchdog: client {} idle past {}s, marked for drop", client.id, dropidle_secs);
        }
        client.unpin();
    }
    marked
}

/// Run one full watchdog tick (spec.md §4.9): idle detection, zombie
/// cleanup, and workbase retirement, in that order. `connector_knows`
/// answers whether the out-of-scope connector still recognises a client id
/// (spec.md §4.2 zombie-cleanup eligibility).
pub fn run_pass(
    registry: &ClientRegistry,
    workbases: &WorkbaseManager,
    dropidle_secs: u64,
    now: TimestampSeconds,
    connector_knows: impl Fn(u64) -> bool,
) -> WatchdogReport {
    let idle_marked = mark_idle_clients(registry, dropidle_secs, now);
    let removed = registry.cleanup_zombies(connector_knows);
    workbases.retire(now);
    debug!(
        "watchdog pass: {} idle-marked, {} zombies removed, {} workbases retained",
        idle_marked,
        removed.len(),
        workbases.retained_count()
    );
    WatchdogReport { idle_marked, zombies_removed: removed.len() }
}
