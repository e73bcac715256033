//! The keyshare sub-session boundary.
//!
//! Schemes whose manager declares a keyshare server split the user's secret
//! key with an online co-signer; proofs for attributes under such schemes
//! are composed from local proof builders plus commitments fetched from that
//! server. The wire protocol of that exchange lives outside this crate: a
//! [`KeyshareDriver`] is injected by the embedder, and its outcome routes
//! back into the session through [`KeyshareListener`].

use crate::error::Error;
use crate::session::handler::Handler;
use crate::session::request::SessionRequest;
use crate::store::{ProofBuilderList, SessionMessage};

/// How a keyshare sub-session reports back into the session that spawned
/// it. Exactly one of these methods is invoked, once.
pub trait KeyshareListener: Send + Sync {
    /// The sub-session completed; `message` is the final message to post.
    fn keyshare_done(&self, message: SessionMessage);

    /// The user aborted the sub-session (e.g. declined to enter a PIN).
    fn keyshare_cancelled(&self);

    /// The keyshare server blocked the account for the given number of
    /// seconds (too many wrong PINs).
    fn keyshare_blocked(&self, duration_secs: u64);

    /// The sub-session failed.
    fn keyshare_error(&self, error: Error);
}

/// Runs the keyshare protocol for one session. Implementations may ask for
/// the user's PIN through the handler, and must report their outcome through
/// the listener before returning.
pub trait KeyshareDriver: Send + Sync {
    fn start(
        &self,
        request: &SessionRequest,
        builders: ProofBuilderList,
        handler: &dyn Handler,
        listener: &dyn KeyshareListener,
    );
}
