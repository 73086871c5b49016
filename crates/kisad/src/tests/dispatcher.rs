//! Unit tests for batch execution, history, and hooks.

use mockall::{Sequence as CallOrder, mock, predicate::eq};
use rstest::{fixture, rstest};
use serde_json::Value;

use kisa_config::Keymap;
use kisa_protocol::methods::KeyPress;

use crate::dispatch::{
    BatchState, Command, CommandError, CommandExecutor, DispatchError, DispatchLimits, Dispatcher,
    EffectDescriptor, HookPoint, HookTarget, Intent, Outcome, ScratchExecutor, Selector,
    StateSnapshot,
};
use crate::session::SessionId;

mock! {
    Executor {}
    impl CommandExecutor for Executor {
        fn apply(&mut self, command: &Command) -> Result<EffectDescriptor, CommandError>;
        fn query(&self, selector: Selector) -> StateSnapshot;
        fn restore(&mut self, snapshot: &StateSnapshot) -> Result<(), CommandError>;
    }
}

const SESSION: SessionId = SessionId::new(7);

fn scratch(text: &str) -> Dispatcher<ScratchExecutor> {
    Dispatcher::new(
        ScratchExecutor::with_text(text),
        Keymap::builtin(),
        DispatchLimits::default(),
    )
}

#[fixture]
fn dispatcher() -> Dispatcher<ScratchExecutor> {
    scratch("")
}

fn insert(text: &str) -> Intent {
    Intent::Commands(vec![Command::new("insert_text").with_argument(text)])
}

fn key(name: &str) -> Intent {
    Intent::Key(KeyPress::new(name))
}

fn text(dispatcher: &Dispatcher<ScratchExecutor>) -> &str {
    &dispatcher.executor().state().text
}

fn command_names(dispatcher: &Dispatcher<ScratchExecutor>) -> Vec<String> {
    dispatcher
        .events()
        .into_iter()
        .filter(|event| event.kind == "command")
        .filter_map(|event| event.payload["name"].as_str().map(str::to_owned))
        .collect()
}

#[rstest]
fn failed_batch_reverses_applied_commands_in_order() {
    let mut executor = MockExecutor::new();
    let mut order = CallOrder::new();
    executor
        .expect_query()
        .with(eq(Selector::All))
        .return_const(StateSnapshot(Value::Null));
    executor
        .expect_apply()
        .withf(|command| command.name == "first")
        .once()
        .in_sequence(&mut order)
        .returning(|_| Ok(EffectDescriptor::reversible(Command::new("undo_first"))));
    executor
        .expect_apply()
        .withf(|command| command.name == "second")
        .once()
        .in_sequence(&mut order)
        .returning(|command| Err(CommandError::rejected(&command.name, "read only")));
    executor
        .expect_apply()
        .withf(|command| command.name == "undo_first")
        .once()
        .in_sequence(&mut order)
        .returning(|_| Ok(EffectDescriptor::unchanged()));

    let mut dispatcher = Dispatcher::new(executor, Keymap::new(), DispatchLimits::default());
    let commands = vec![Command::new("first"), Command::new("second")];
    let error = dispatcher
        .dispatch(SESSION, Intent::Commands(commands))
        .expect_err("second command fails");

    assert!(matches!(error, DispatchError::BatchFailed { .. }));
    assert!(dispatcher.log().is_obsolete(1));
    assert!(dispatcher.log().is_obsolete(2));
    assert_eq!(dispatcher.head(), None);
}

#[rstest]
fn commands_are_logged_before_they_run() {
    let mut executor = MockExecutor::new();
    executor
        .expect_query()
        .return_const(StateSnapshot(Value::Null));
    executor
        .expect_apply()
        .once()
        .returning(|command| Err(CommandError::Unknown { name: command.name.clone() }));

    let mut dispatcher = Dispatcher::new(executor, Keymap::new(), DispatchLimits::default());
    dispatcher
        .dispatch(SESSION, Intent::Commands(vec![Command::new("explode")]))
        .expect_err("unknown command");

    let events = dispatcher.events();
    let kinds: Vec<&str> = events.iter().map(|event| event.kind.as_str()).collect();
    assert_eq!(kinds, ["command", "failure"]);
    assert_eq!(events[0].payload["name"], "explode");
    assert!(events[0].obsolete);
}

#[rstest]
fn undo_and_redo_append_to_the_log(mut dispatcher: Dispatcher<ScratchExecutor>) {
    dispatcher.dispatch(SESSION, insert("ab")).expect("insert");
    let undo = dispatcher.undo(SESSION).expect("undo");
    assert_eq!(text(&dispatcher), "");
    assert_eq!(undo.events, [2]);
    assert_eq!(
        dispatcher.log().batch(undo.batch).map(|record| record.state),
        Some(BatchState::Undone)
    );

    let redo = dispatcher.redo(SESSION).expect("redo");
    assert_eq!(text(&dispatcher), "ab");
    assert_eq!(redo.events, [3]);
    assert_eq!(dispatcher.head(), Some(redo.batch));
    assert_eq!(dispatcher.log().len(), 3);
}

#[rstest]
fn undo_walks_back_through_several_batches(mut dispatcher: Dispatcher<ScratchExecutor>) {
    dispatcher.dispatch(SESSION, insert("a")).expect("first");
    dispatcher.dispatch(SESSION, insert("b")).expect("second");
    dispatcher.undo(SESSION).expect("undo second");
    dispatcher.undo(SESSION).expect("undo first");
    assert_eq!(text(&dispatcher), "");
    assert_eq!(
        dispatcher.undo(SESSION),
        Err(DispatchError::NothingTo { action: "undo" })
    );
}

#[rstest]
fn new_edits_discard_redo(mut dispatcher: Dispatcher<ScratchExecutor>) {
    dispatcher.dispatch(SESSION, insert("a")).expect("insert");
    dispatcher.undo(SESSION).expect("undo");
    dispatcher.dispatch(SESSION, insert("b")).expect("insert");
    assert_eq!(
        dispatcher.redo(SESSION),
        Err(DispatchError::NothingTo { action: "redo" })
    );
}

#[rstest]
fn undo_binding_runs_history_operation(mut dispatcher: Dispatcher<ScratchExecutor>) {
    dispatcher.dispatch(SESSION, insert("a")).expect("insert");
    let outcome = dispatcher.dispatch(SESSION, key("u")).expect("undo key");
    assert!(matches!(outcome, Outcome::Applied(_)));
    assert_eq!(text(&dispatcher), "");
    let kinds: Vec<String> = dispatcher.events().into_iter().map(|event| event.kind).collect();
    assert_eq!(kinds, ["command", "undo"]);
}

#[rstest]
fn key_sequences_wait_for_completion() {
    let mut dispatcher = scratch("ab");
    assert_eq!(dispatcher.dispatch(SESSION, key("g")), Ok(Outcome::Pending));
    dispatcher.dispatch(SESSION, key("g")).expect("g g");
    assert_eq!(dispatcher.executor().state().cursor, 0);
}

#[rstest]
fn departed_sessions_lose_buffered_keys() {
    let mut dispatcher = scratch("ab");
    assert_eq!(dispatcher.dispatch(SESSION, key("g")), Ok(Outcome::Pending));
    dispatcher.session_closed(SESSION);
    assert_eq!(dispatcher.dispatch(SESSION, key("g")), Ok(Outcome::Pending));
    assert_eq!(dispatcher.executor().state().cursor, 2);
}

#[rstest]
fn shifted_characters_insert_as_typed(mut dispatcher: Dispatcher<ScratchExecutor>) {
    dispatcher.dispatch(SESSION, key("i")).expect("enter insert mode");
    let shifted: KeyPress = "shift-A".parse().expect("parse");
    dispatcher
        .dispatch(SESSION, Intent::Key(shifted))
        .expect("shifted character is printable");
    assert_eq!(text(&dispatcher), "A");
}

#[rstest]
fn unbound_keys_are_rejected(mut dispatcher: Dispatcher<ScratchExecutor>) {
    let error = dispatcher
        .dispatch(SESSION, key("z"))
        .expect_err("nothing bound to z");
    assert_eq!(
        error,
        DispatchError::Unbound {
            mode: "normal".to_owned(),
            input: "z".to_owned()
        }
    );
    assert!(dispatcher.log().is_empty());
}

#[rstest]
fn hooks_wrap_their_command() {
    let mut dispatcher = scratch("ab");
    let hooks = dispatcher.hooks_mut();
    hooks.register(
        HookPoint::Before,
        HookTarget::Command("insert_text".to_owned()),
        |_| vec![Command::new("cursor_start")],
    );
    hooks.register(
        HookPoint::After,
        HookTarget::Command("insert_text".to_owned()),
        |_| vec![Command::new("cursor_end")],
    );

    let outcome = dispatcher.dispatch(SESSION, insert("x")).expect("dispatch");
    let Outcome::Applied(report) = outcome else {
        panic!("batch should apply");
    };
    assert_eq!(report.events, [1, 2, 3]);
    assert_eq!(
        command_names(&dispatcher),
        ["cursor_start", "insert_text", "cursor_end"]
    );
    assert_eq!(text(&dispatcher), "xab");
    assert_eq!(dispatcher.executor().state().cursor, 3);
}

#[rstest]
fn runaway_hooks_hit_the_batch_ceiling() {
    let limits = DispatchLimits {
        max_batch_events: 2,
    };
    let mut dispatcher = Dispatcher::new(ScratchExecutor::with_text("ab"), Keymap::new(), limits);
    dispatcher
        .hooks_mut()
        .register(HookPoint::After, HookTarget::All, |_| {
            vec![Command::new("cursor_left")]
        });

    let error = dispatcher
        .dispatch(SESSION, insert("x"))
        .expect_err("hook output is unbounded");
    assert!(matches!(error, DispatchError::BatchTooLarge { limit: 2, .. }));
    assert_eq!(text(&dispatcher), "ab");
    assert_eq!(dispatcher.executor().state().cursor, 2);
}

#[rstest]
fn insert_at_rejects_unknown_anchors(mut dispatcher: Dispatcher<ScratchExecutor>) {
    dispatcher.dispatch(SESSION, insert("a")).expect("insert");
    assert_eq!(
        dispatcher.insert_at(SESSION, 9, vec![Command::new("cursor_start")]),
        Err(DispatchError::UnknownAnchor { sequence: 9 })
    );
}

#[rstest]
fn insert_at_zero_goes_before_everything(mut dispatcher: Dispatcher<ScratchExecutor>) {
    let Ok(Outcome::Applied(original)) = dispatcher.dispatch(SESSION, insert("b")) else {
        panic!("insert should apply");
    };
    let report = dispatcher
        .insert_at(SESSION, 0, vec![Command::new("insert_text").with_argument("a")])
        .expect("insert at start");
    assert_eq!(text(&dispatcher), "ab");
    assert_eq!(report.events, [2, 3]);
    assert!(dispatcher.log().is_obsolete(1));
    assert_eq!(
        dispatcher
            .log()
            .batch(original.batch)
            .map(|record| record.state),
        Some(BatchState::Superseded)
    );
}

#[rstest]
fn failed_insert_at_restores_the_suffix(mut dispatcher: Dispatcher<ScratchExecutor>) {
    dispatcher.dispatch(SESSION, insert("a")).expect("first");
    dispatcher.dispatch(SESSION, insert("c")).expect("second");
    let error = dispatcher
        .insert_at(SESSION, 1, vec![Command::new("explode")])
        .expect_err("unknown command");

    assert!(matches!(error, DispatchError::BatchFailed { .. }));
    assert_eq!(text(&dispatcher), "ac");
    assert!(!dispatcher.log().is_obsolete(2));
    assert!(dispatcher.log().is_obsolete(3));
}

#[rstest]
fn replay_rebuilds_from_the_latest_snapshot(mut dispatcher: Dispatcher<ScratchExecutor>) {
    dispatcher.dispatch(SESSION, insert("a")).expect("first");
    assert_eq!(dispatcher.snapshot(), 1);
    dispatcher.dispatch(SESSION, insert("b")).expect("second");
    dispatcher.undo(SESSION).expect("undo");

    dispatcher.replay().expect("replay");
    assert_eq!(text(&dispatcher), "a");
    assert_eq!(dispatcher.executor().state().cursor, 1);
}

#[rstest]
fn replay_skips_edits_undone_after_a_snapshot(mut dispatcher: Dispatcher<ScratchExecutor>) {
    dispatcher.dispatch(SESSION, insert("a")).expect("insert");
    assert_eq!(dispatcher.snapshot(), 1);
    dispatcher.undo(SESSION).expect("undo");
    assert_eq!(text(&dispatcher), "");

    dispatcher.replay().expect("replay");
    assert_eq!(text(&dispatcher), "");
    assert_eq!(dispatcher.executor().state().cursor, 0);
}

#[rstest]
fn documentation_follows_the_current_mode(mut dispatcher: Dispatcher<ScratchExecutor>) {
    assert_eq!(
        dispatcher.documentation(None, "i").as_deref(),
        Some("enter insert mode")
    );
    dispatcher.dispatch(SESSION, key("i")).expect("enter insert mode");
    assert_eq!(
        dispatcher.documentation(None, "escape").as_deref(),
        Some("return to normal mode")
    );
    assert_eq!(
        dispatcher.documentation(Some("normal"), "x").as_deref(),
        Some("delete character")
    );
}
