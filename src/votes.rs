//! Vote tallying.
//!
//! A [`VoteState`] lives on every post and comment. Casting the vote you
//! already hold cancels it, casting the opposite vote switches sides in one
//! step. The score is recomputed from the voter sets after every transition,
//! so `score == |upvoters| - |downvoters|` holds no matter what sequence of
//! actions arrives.
//!
//! [`VoteState::apply`] returns the signed score movement, which the caller
//! applies to the author's reputation counter as a separate atomic update.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteAction {
    Up,
    Down,
}

impl VoteAction {
    /// Parses the wire value of a vote request. Anything other than `"up"`
    /// or `"down"` is rejected.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "up" => Some(VoteAction::Up),
            "down" => Some(VoteAction::Down),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteState {
    pub score: i64,
    pub upvoters: HashSet<UserId>,
    pub downvoters: HashSet<UserId>,
}

impl VoteState {
    /// Applies one vote action and returns the reputation delta for the
    /// author of the voted content.
    ///
    /// The delta always equals the score movement:
    ///
    /// | voter currently | up                  | down                |
    /// |-----------------|---------------------|---------------------|
    /// | neither         | join upvoters, +1   | join downvoters, -1 |
    /// | upvoted         | toggle off, -1      | switch sides, -2    |
    /// | downvoted       | switch sides, +2    | toggle off, +1      |
    pub fn apply(&mut self, voter: UserId, action: VoteAction) -> i64 {
        let before = self.upvoters.len() as i64 - self.downvoters.len() as i64;

        match action {
            VoteAction::Up => {
                if !self.upvoters.remove(&voter) {
                    self.downvoters.remove(&voter);
                    self.upvoters.insert(voter);
                }
            }
            VoteAction::Down => {
                if !self.downvoters.remove(&voter) {
                    self.upvoters.remove(&voter);
                    self.downvoters.insert(voter);
                }
            }
        }

        self.score = self.upvoters.len() as i64 - self.downvoters.len() as i64;

        self.score - before
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn assert_consistent(state: &VoteState) {
        assert_eq!(
            state.score,
            state.upvoters.len() as i64 - state.downvoters.len() as i64
        );
        assert!(state.upvoters.is_disjoint(&state.downvoters));
    }

    #[test]
    fn parse_actions() {
        assert_eq!(VoteAction::parse("up"), Some(VoteAction::Up));
        assert_eq!(VoteAction::parse("down"), Some(VoteAction::Down));
        assert_eq!(VoteAction::parse("sideways"), None);
        assert_eq!(VoteAction::parse("UP"), None);
    }

    #[test]
    fn first_upvote_counts_once() {
        let voter = Uuid::new_v4();
        let mut state = VoteState::default();

        let delta = state.apply(voter, VoteAction::Up);

        assert_eq!(delta, 1);
        assert_eq!(state.score, 1);
        assert!(state.upvoters.contains(&voter));
        assert_consistent(&state);
    }

    #[test]
    fn repeating_a_vote_toggles_it_off() {
        let voter = Uuid::new_v4();
        let mut state = VoteState::default();

        state.apply(voter, VoteAction::Up);
        let delta = state.apply(voter, VoteAction::Up);

        assert_eq!(delta, -1);
        assert_eq!(state.score, 0);
        assert!(state.upvoters.is_empty());
        assert_consistent(&state);

        state.apply(voter, VoteAction::Down);
        let delta = state.apply(voter, VoteAction::Down);

        assert_eq!(delta, 1);
        assert_eq!(state.score, 0);
        assert!(state.downvoters.is_empty());
        assert_consistent(&state);
    }

    #[test]
    fn switching_sides_moves_two_points() {
        let voter = Uuid::new_v4();
        let mut state = VoteState::default();

        state.apply(voter, VoteAction::Up);
        let delta = state.apply(voter, VoteAction::Down);

        assert_eq!(delta, -2);
        assert_eq!(state.score, -1);
        assert!(state.downvoters.contains(&voter));
        assert!(state.upvoters.is_empty());
        assert_consistent(&state);

        let delta = state.apply(voter, VoteAction::Up);

        assert_eq!(delta, 2);
        assert_eq!(state.score, 1);
        assert!(state.upvoters.contains(&voter));
        assert!(state.downvoters.is_empty());
        assert_consistent(&state);
    }

    #[test]
    fn two_voter_scenario() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut state = VoteState::default();

        assert_eq!(state.apply(a, VoteAction::Up), 1);
        assert_eq!(state.score, 1);
        assert!(state.upvoters.contains(&a));

        assert_eq!(state.apply(a, VoteAction::Up), -1);
        assert_eq!(state.score, 0);
        assert!(state.upvoters.is_empty());

        assert_eq!(state.apply(a, VoteAction::Down), -1);
        assert_eq!(state.score, -1);
        assert!(state.downvoters.contains(&a));

        assert_eq!(state.apply(b, VoteAction::Up), 1);
        assert_eq!(state.score, 0);
        assert!(state.upvoters.contains(&b));
        assert!(state.downvoters.contains(&a));
        assert_consistent(&state);
    }

    #[test]
    fn down_then_up_lands_one_above_empty() {
        let voter = Uuid::new_v4();
        let mut state = VoteState::default();

        assert_eq!(state.apply(voter, VoteAction::Down), -1);
        assert_eq!(state.apply(voter, VoteAction::Up), 2);

        assert_eq!(state.score, 1);
        assert!(state.upvoters.contains(&voter));
        assert!(state.downvoters.is_empty());
        assert_consistent(&state);
    }

    #[test]
    fn score_tracks_sets_over_arbitrary_sequences() {
        let voters: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let mut state = VoteState::default();

        let actions = [
            (0, VoteAction::Up),
            (1, VoteAction::Down),
            (0, VoteAction::Down),
            (2, VoteAction::Up),
            (1, VoteAction::Down),
            (3, VoteAction::Down),
            (0, VoteAction::Down),
            (2, VoteAction::Up),
            (3, VoteAction::Up),
        ];

        for (voter, action) in actions {
            let before = state.score;
            let delta = state.apply(voters[voter], action);

            assert_eq!(state.score, before + delta);
            assert_consistent(&state);
        }
    }
}
