use crate::types::{SigningContext, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Whether everyone who must sign has signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuorumState {
    Incomplete,
    Complete,
}

/// Finer view of an incomplete quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuorumPhase {
    /// No completer yet, or the creator or completer has not signed
    CollectingParticipants,

    /// Creator and completer signed; only directors remain
    ReadyForFinalParty,

    Complete,
}

/// Detailed results of a quorum evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumReport {
    pub state: QuorumState,
    pub phase: QuorumPhase,

    /// Everyone whose signature is required right now. Once the quorum was
    /// reached, only the required users who signed.
    pub required: BTreeSet<UserId>,

    /// Every signer in the ledger, required or not
    pub signed: BTreeSet<UserId>,

    /// `required \ signed`
    pub missing: BTreeSet<UserId>,
}

impl QuorumReport {
    pub fn is_complete(&self) -> bool {
        self.state == QuorumState::Complete
    }
}

/// Evaluate the quorum for a context and the set of users that have signed.
///
/// Signatures by users outside the required set are tolerated and ignored.
/// Without a completer the document is never complete.
pub fn evaluate(context: &SigningContext, signed: &BTreeSet<UserId>) -> QuorumReport {
    let required = context.required_signers();
    let missing: BTreeSet<UserId> = required.difference(signed).copied().collect();

    let participants_signed = context.completer.is_some()
        && context.participants().iter().all(|user| signed.contains(user));

    let (state, phase) = if context.completer.is_some() && missing.is_empty() {
        (QuorumState::Complete, QuorumPhase::Complete)
    } else if participants_signed {
        (QuorumState::Incomplete, QuorumPhase::ReadyForFinalParty)
    } else {
        (QuorumState::Incomplete, QuorumPhase::CollectingParticipants)
    };

    QuorumReport {
        state,
        phase,
        required,
        signed: signed.clone(),
        missing,
    }
}

/// Report for a document whose quorum was reached before. Later membership
/// changes never reopen it.
pub fn reached(context: &SigningContext, signed: &BTreeSet<UserId>) -> QuorumReport {
    let required = context.required_signers().intersection(signed).copied().collect();
    QuorumReport {
        state: QuorumState::Complete,
        phase: QuorumPhase::Complete,
        required,
        signed: signed.clone(),
        missing: BTreeSet::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentId;

    fn context(creator: i64, completer: Option<i64>, directors: &[i64]) -> SigningContext {
        SigningContext {
            document_id: DocumentId(1),
            creator: UserId(creator),
            completer: completer.map(UserId),
            director_ids: directors.iter().copied().map(UserId).collect(),
        }
    }

    fn users(ids: &[i64]) -> BTreeSet<UserId> {
        ids.iter().copied().map(UserId).collect()
    }

    #[test]
    fn worked_example_progression() {
        let ctx = context(10, Some(10), &[20, 21]);

        let report = evaluate(&ctx, &users(&[]));
        assert_eq!(report.phase, QuorumPhase::CollectingParticipants);
        assert_eq!(report.missing, users(&[10, 20, 21]));

        let report = evaluate(&ctx, &users(&[10]));
        assert_eq!(report.state, QuorumState::Incomplete);
        assert_eq!(report.phase, QuorumPhase::ReadyForFinalParty);
        assert_eq!(report.missing, users(&[20, 21]));

        let report = evaluate(&ctx, &users(&[10, 20]));
        assert_eq!(report.phase, QuorumPhase::ReadyForFinalParty);
        assert_eq!(report.missing, users(&[21]));

        let report = evaluate(&ctx, &users(&[10, 20, 21]));
        assert!(report.is_complete());
        assert!(report.missing.is_empty());
    }

    #[test]
    fn no_completer_is_never_complete() {
        let ctx = context(10, None, &[]);
        let report = evaluate(&ctx, &users(&[10]));
        assert_eq!(report.state, QuorumState::Incomplete);
        assert_eq!(report.phase, QuorumPhase::CollectingParticipants);
        assert!(report.missing.is_empty());
    }

    #[test]
    fn director_signing_first_does_not_advance_phase() {
        let ctx = context(10, Some(11), &[20]);
        let report = evaluate(&ctx, &users(&[20, 10]));
        assert_eq!(report.phase, QuorumPhase::CollectingParticipants);
        assert_eq!(report.missing, users(&[11]));
    }

    #[test]
    fn extra_signers_are_ignored() {
        let ctx = context(10, Some(11), &[]);
        let report = evaluate(&ctx, &users(&[10, 11, 99]));
        assert!(report.is_complete());
        assert!(report.signed.contains(&UserId(99)));
    }

    #[test]
    fn no_directors_completes_with_participants() {
        let ctx = context(10, Some(10), &[]);
        assert!(evaluate(&ctx, &users(&[10])).is_complete());
    }

    #[test]
    fn reached_quorum_ignores_later_directors() {
        let signed = users(&[10, 20]);
        assert!(evaluate(&context(10, Some(10), &[20]), &signed).is_complete());

        let grown = context(10, Some(10), &[20, 22]);
        assert!(!evaluate(&grown, &signed).is_complete());

        let report = reached(&grown, &signed);
        assert_eq!(report.state, QuorumState::Complete);
        assert_eq!(report.phase, QuorumPhase::Complete);
        assert_eq!(report.required, users(&[10, 20]));
        assert!(report.missing.is_empty());
    }
}
