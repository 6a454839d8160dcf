//! Property-based tests for the state store
//!
//! - Dispatch is equivalent to folding `execute` over the initial state
//! - Streamed deltas for one turn always concatenate into a single message

use super::action::{Action, ChunkUpdate};
use super::store::StateStore;
use super::types::{ApplicationState, Message, Mode, ProviderKind, Role};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::path::Path;
use uuid::Uuid;

// ============================================================================
// Strategies
// ============================================================================

fn initial_state() -> ApplicationState {
    ApplicationState::new("prop", Some(Path::new("/prop")), "prop-session")
}

fn arb_turn_id() -> impl Strategy<Value = Uuid> {
    // Small pool so chunks regularly hit an existing turn
    (0u128..4).prop_map(Uuid::from_u128)
}

fn arb_role() -> impl Strategy<Value = Role> {
    prop_oneof![
        Just(Role::User),
        Just(Role::Assistant),
        Just(Role::System),
        Just(Role::Tool),
    ]
}

fn arb_mode() -> impl Strategy<Value = Mode> {
    prop_oneof![Just(Mode::Plan), Just(Mode::Execute), Just(Mode::Yolo)]
}

fn arb_action() -> impl Strategy<Value = Action> {
    let fixed_ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    prop_oneof![
        (arb_turn_id(), arb_role(), "[a-zA-Z ]{0,12}").prop_map(move |(turn_id, role, content)| {
            Action::StartTurn {
                turn_id,
                role,
                content,
                timestamp: fixed_ts,
            }
        }),
        (arb_turn_id(), "[a-z !]{0,8}").prop_map(move |(turn_id, delta)| {
            Action::AppendChunk(ChunkUpdate {
                turn_id,
                role: Role::Assistant,
                delta,
                timestamp: fixed_ts,
                usage: None,
                tool_calls: vec![],
            })
        }),
        (any::<bool>(), proptest::option::of("[a-z]{1,8}")).prop_map(|(success, error)| {
            Action::CompleteTurn {
                turn_id: None,
                success,
                message: None,
                error,
            }
        }),
        "[a-z]{1,8}".prop_map(move |text| {
            Action::AppendMessage(Message::user(text).with_timestamp(fixed_ts))
        }),
        Just(Action::ClearHistory),
        "[a-z0-9-]{0,6}".prop_map(|model| Action::ChangeProviderSettings {
            provider: ProviderKind::OpenAI,
            model,
        }),
        arb_mode().prop_map(Action::ChangeMode),
    ]
}

fn without_clock(mut state: ApplicationState) -> ApplicationState {
    state.context.updated = state.context.created;
    state
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_dispatch_equals_left_fold(actions in proptest::collection::vec(arb_action(), 0..40)) {
        let initial = initial_state();
        let store = StateStore::new(initial.clone());

        let mut expected = initial;
        for action in actions {
            let folded = action.execute(&expected);
            let dispatched = store.dispatch(action);

            prop_assert_eq!(folded.is_ok(), dispatched.is_ok());
            if let Ok(next) = folded {
                expected = next;
            }
            prop_assert_eq!(without_clock(store.get_state()), without_clock(expected.clone()));
        }
    }

    #[test]
    fn prop_turn_deltas_concatenate(deltas in proptest::collection::vec("[a-zA-Z0-9 ]{0,6}", 1..20)) {
        let turn_id = Uuid::new_v4();
        let ts = Utc::now();
        let mut state = initial_state();

        for delta in &deltas {
            state = Action::AppendChunk(ChunkUpdate {
                turn_id,
                role: Role::Assistant,
                delta: delta.clone(),
                timestamp: ts,
                usage: None,
                tool_calls: vec![],
            })
            .execute(&state)
            .unwrap();
        }

        prop_assert_eq!(state.context.messages.len(), 1);
        prop_assert_eq!(&state.context.messages[0].content, &deltas.concat());
    }

    #[test]
    fn prop_execute_never_mutates_input(actions in proptest::collection::vec(arb_action(), 1..20)) {
        let mut state = initial_state();
        for action in actions {
            let before = state.clone();
            let result = action.execute(&state);
            prop_assert_eq!(&state, &before);
            if let Ok(next) = result {
                state = next;
            }
        }
    }
}
