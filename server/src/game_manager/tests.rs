use super::*;
use crate::accounts::AccountStore;
use crate::engine::EngineService;
use crate::error::GameError;
use shared::{ClientMessage, Coord, ServerMessage, Side};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn make_state() -> Arc<AppState> {
    Arc::new(AppState::new(
        AccountStore::new(None),
        EngineService::new("stockfish".to_string()),
    ))
}

fn connect(state: &AppState, id: &str) -> mpsc::UnboundedReceiver<ServerMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    state.add_player(id.to_string(), tx);
    rx
}

async fn expect_msg(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
    tokio::time::timeout(Duration::from_millis(1500), rx.recv())
        .await
        .expect("Timed out waiting for message")
        .expect("Channel closed")
}

fn expect_no_msg(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) {
    assert!(
        rx.try_recv().is_err(),
        "expected no pending message for this player"
    );
}

fn mv(from: (i32, i32), to: (i32, i32)) -> ClientMessage {
    ClientMessage::Move {
        from: Coord {
            row: from.0,
            col: from.1,
        },
        to: Coord {
            row: to.0,
            col: to.1,
        },
        promotion: None,
        white_time: None,
        black_time: None,
    }
}

async fn side_of(state: &AppState, room_id: &str, player_id: &str) -> Side {
    let room_lock = state.rooms.get(room_id).expect("room missing");
    let session = room_lock.read().await;
    session.seat_of(player_id).expect("player not seated")
}

/// Sets up a started game between two named connections and returns the
/// room id, with both receivers drained past the setup messages.
async fn start_game(
    state: &Arc<AppState>,
    host: &str,
    host_name: &str,
    guest: &str,
    guest_name: &str,
    rx_host: &mut mpsc::UnboundedReceiver<ServerMessage>,
    rx_guest: &mut mpsc::UnboundedReceiver<ServerMessage>,
) -> String {
    state.set_username(host, host_name).unwrap();
    state.set_username(guest, guest_name).unwrap();
    state.create_room(host, 300).await.unwrap();
    let room_id = match expect_msg(rx_host).await {
        ServerMessage::RoomCreated { room_id } => room_id,
        other => panic!("expected room_created, got {:?}", other),
    };
    state.join_room(guest, &room_id).await.unwrap();
    expect_msg(rx_host).await; // game_start
    expect_msg(rx_guest).await; // game_start
    room_id
}

#[tokio::test]
async fn room_create_and_join_scenario() {
    let state = make_state();
    let mut rx_alice = connect(&state, "c-alice");
    let mut rx_bob = connect(&state, "c-bob");

    state.set_username("c-alice", "Alice").unwrap();
    state.set_username("c-bob", "Bob").unwrap();

    state.create_room("c-alice", 300).await.unwrap();
    let room_id = match expect_msg(&mut rx_alice).await {
        ServerMessage::RoomCreated { room_id } => room_id,
        other => panic!("expected room_created, got {:?}", other),
    };
    assert_eq!(room_id.len(), 5);
    assert!(room_id
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

    // Joining is case-insensitive on the room code.
    state
        .join_room("c-bob", &room_id.to_lowercase())
        .await
        .unwrap();

    let alice_start = expect_msg(&mut rx_alice).await;
    let bob_start = expect_msg(&mut rx_bob).await;
    let (alice_color, bob_color) = match (&alice_start, &bob_start) {
        (
            ServerMessage::GameStart {
                color: a,
                time: 300,
                opponent_name: a_opp,
                matchmade: false,
                ..
            },
            ServerMessage::GameStart {
                color: b,
                time: 300,
                opponent_name: b_opp,
                matchmade: false,
                ..
            },
        ) => {
            assert_eq!(a_opp.as_deref(), Some("Bob"));
            assert_eq!(b_opp.as_deref(), Some("Alice"));
            (*a, *b)
        }
        other => panic!("expected two game_start messages, got {:?}", other),
    };
    assert_eq!(alice_color, bob_color.opposite());

    // White moves e2-e4; the opponent receives the relay.
    let (white, white_rx, black_rx) = if alice_color == Side::White {
        ("c-alice", &mut rx_alice, &mut rx_bob)
    } else {
        ("c-bob", &mut rx_bob, &mut rx_alice)
    };
    state.handle_move(white, mv((6, 4), (4, 4))).await.unwrap();
    match expect_msg(black_rx).await {
        ServerMessage::Move { from, to, .. } => {
            assert_eq!(from, Coord { row: 6, col: 4 });
            assert_eq!(to, Coord { row: 4, col: 4 });
        }
        other => panic!("expected relayed move, got {:?}", other),
    }

    // A second move before the opponent replies is a turn violation.
    let err = state
        .handle_move(white, mv((6, 3), (4, 3)))
        .await
        .unwrap_err();
    assert_eq!(err, GameError::NotYourTurn);
    expect_no_msg(black_rx);
    expect_no_msg(white_rx);
}

#[tokio::test]
async fn turn_alternates_only_on_accepted_moves() {
    let state = make_state();
    let mut rx1 = connect(&state, "p1");
    let mut rx2 = connect(&state, "p2");
    let room_id = start_game(&state, "p1", "Alice", "p2", "Bob", &mut rx1, &mut rx2).await;

    let white = if side_of(&state, &room_id, "p1").await == Side::White {
        "p1"
    } else {
        "p2"
    };
    let black = if white == "p1" { "p2" } else { "p1" };

    // Black tries to move first: rejected, turn unchanged.
    let err = state
        .handle_move(black, mv((1, 0), (3, 0)))
        .await
        .unwrap_err();
    assert_eq!(err, GameError::NotYourTurn);

    // Strict alternation over a few plies.
    state.handle_move(white, mv((6, 4), (4, 4))).await.unwrap();
    state.handle_move(black, mv((1, 4), (3, 4))).await.unwrap();
    state.handle_move(white, mv((7, 6), (5, 5))).await.unwrap();

    let room_lock = state.rooms.get(&room_id).unwrap();
    let session = room_lock.read().await;
    // Three accepted moves: black to play.
    assert_eq!(session.turn, Side::Black);
}

#[tokio::test]
async fn out_of_bounds_move_is_dropped_silently() {
    let state = make_state();
    let mut rx1 = connect(&state, "p1");
    let mut rx2 = connect(&state, "p2");
    let room_id = start_game(&state, "p1", "Alice", "p2", "Bob", &mut rx1, &mut rx2).await;

    let white = if side_of(&state, &room_id, "p1").await == Side::White {
        "p1"
    } else {
        "p2"
    };
    let (mut rx_white, mut rx_black) = if white == "p1" {
        (rx1, rx2)
    } else {
        (rx2, rx1)
    };

    assert!(state.handle_move(white, mv((8, 0), (0, 0))).await.is_ok());
    assert!(state.handle_move(white, mv((0, 0), (0, -1))).await.is_ok());
    expect_no_msg(&mut rx_black);
    expect_no_msg(&mut rx_white);

    let room_lock = state.rooms.get(&room_id).unwrap();
    let session = room_lock.read().await;
    assert_eq!(session.turn, Side::White);
}

#[tokio::test]
async fn first_terminal_event_wins() {
    let state = make_state();
    state.accounts.create("Alice", "pw").unwrap();
    state.accounts.create("Bob", "pw").unwrap();

    let mut rx1 = connect(&state, "p1");
    let mut rx2 = connect(&state, "p2");
    let room_id = start_game(&state, "p1", "Alice", "p2", "Bob", &mut rx1, &mut rx2).await;
    let p1_side = side_of(&state, &room_id, "p1").await;

    // p1 resigns, then both stale terminal events arrive late.
    state.handle_resign("p1").await;
    state.handle_timeout("p2", p1_side.opposite()).await;
    state
        .handle_game_end("p1", "win", Some(p1_side))
        .await;

    match expect_msg(&mut rx2).await {
        ServerMessage::OpponentResigned => {}
        other => panic!("expected opponent_resigned, got {:?}", other),
    }
    expect_no_msg(&mut rx2);
    expect_no_msg(&mut rx1);

    // Only the resignation was recorded.
    let alice = state.accounts.stats("alice").unwrap();
    let bob = state.accounts.stats("bob").unwrap();
    assert_eq!((alice.wins, alice.losses, alice.draws), (0, 1, 0));
    assert_eq!((bob.wins, bob.losses, bob.draws), (1, 0, 0));

    let room_lock = state.rooms.get(&room_id).unwrap();
    let session = room_lock.read().await;
    assert_eq!(session.outcome, Some(GameOutcome::Win(p1_side.opposite())));
}

#[tokio::test]
async fn reported_draw_is_recorded_once() {
    let state = make_state();
    state.accounts.create("Alice", "pw").unwrap();
    state.accounts.create("Bob", "pw").unwrap();

    let mut rx1 = connect(&state, "p1");
    let mut rx2 = connect(&state, "p2");
    start_game(&state, "p1", "Alice", "p2", "Bob", &mut rx1, &mut rx2).await;

    state.handle_game_end("p1", "draw", None).await;
    state.handle_game_end("p2", "draw", None).await;

    let alice = state.accounts.stats("alice").unwrap();
    let bob = state.accounts.stats("bob").unwrap();
    assert_eq!(alice.draws, 1);
    assert_eq!(bob.draws, 1);
}

#[tokio::test]
async fn identity_owns_at_most_one_session() {
    let state = make_state();
    let mut rx1 = connect(&state, "p1");
    let _rx2 = connect(&state, "p2");

    state.set_username("p1", "Alice").unwrap();
    state.set_username("p2", "alice").unwrap();

    state.create_room("p1", 300).await.unwrap();
    let room_id = match expect_msg(&mut rx1).await {
        ServerMessage::RoomCreated { room_id } => room_id,
        other => panic!("expected room_created, got {:?}", other),
    };

    // Same connection cannot open a second room.
    assert_eq!(
        state.create_room("p1", 300).await,
        Err(GameError::AlreadyInSession)
    );
    // Same identity on another connection is blocked case-insensitively.
    assert_eq!(
        state.create_room("p2", 300).await,
        Err(GameError::AlreadyInSession)
    );
    // A session can never pair an identity with itself: the guard stops the
    // join before the room is even touched.
    assert_eq!(
        state.join_room("p2", &room_id).await,
        Err(GameError::AlreadyInSession)
    );
    assert_eq!(
        state.join_room("p1", &room_id).await,
        Err(GameError::AlreadyInSession)
    );
}

#[tokio::test]
async fn join_validations() {
    let state = make_state();
    let mut rx1 = connect(&state, "p1");
    let mut rx2 = connect(&state, "p2");
    let _rx3 = connect(&state, "p3");

    assert_eq!(
        state.create_room("p1", 42).await,
        Err(GameError::BadTimeControl)
    );

    assert_eq!(
        state.join_room("p2", "ZZZZZ").await,
        Err(GameError::RoomNotFound("ZZZZZ".to_string()))
    );

    state.create_room("p1", 0).await.unwrap();
    let room_id = match expect_msg(&mut rx1).await {
        ServerMessage::RoomCreated { room_id } => room_id,
        other => panic!("expected room_created, got {:?}", other),
    };
    state.join_room("p2", &room_id).await.unwrap();
    expect_msg(&mut rx1).await;
    expect_msg(&mut rx2).await;

    // A third player finds the room full.
    assert_eq!(state.join_room("p3", &room_id).await, Err(GameError::RoomFull));
}

#[tokio::test]
async fn username_rules() {
    let state = make_state();
    let _rx = connect(&state, "p1");

    assert_eq!(
        state.set_username("p1", "x"),
        Err(GameError::UsernameInvalid)
    );
    assert_eq!(
        state.set_username("p1", "not valid!"),
        Err(GameError::UsernameInvalid)
    );
    // Over-long names are truncated to 20 chars before validation.
    let name = state
        .set_username("p1", "abcdefghijklmnopqrstuvwxyz")
        .unwrap();
    assert_eq!(name, "abcdefghijklmnopqrst");
    // Identity binds once per connection.
    assert_eq!(
        state.set_username("p1", "Other_Name"),
        Err(GameError::UsernameAlreadySet)
    );
}

#[tokio::test]
async fn matchmaking_never_pairs_an_identity_with_itself() {
    let state = make_state();
    let mut rx_a1 = connect(&state, "a1");
    let mut rx_a2 = connect(&state, "a2");
    let mut rx_bob = connect(&state, "bob");

    state.set_username("a1", "Alice").unwrap();
    state.set_username("a2", "ALICE").unwrap();
    state.set_username("bob", "Bob").unwrap();

    state.matchmaking_join("a1", 300).await.unwrap();
    match expect_msg(&mut rx_a1).await {
        ServerMessage::MatchmakingWaiting { queue_size: 1 } => {}
        other => panic!("expected matchmaking_waiting, got {:?}", other),
    }

    // Same identity on a second connection queues behind itself.
    state.matchmaking_join("a2", 300).await.unwrap();
    match expect_msg(&mut rx_a2).await {
        ServerMessage::MatchmakingWaiting { queue_size: 2 } => {}
        other => panic!("expected matchmaking_waiting, got {:?}", other),
    }

    // Bob pairs with the first distinct identity in FIFO order: a1.
    state.matchmaking_join("bob", 300).await.unwrap();
    match expect_msg(&mut rx_a1).await {
        ServerMessage::GameStart {
            matchmade: true,
            opponent_name,
            ..
        } => assert_eq!(opponent_name.as_deref(), Some("Bob")),
        other => panic!("expected game_start, got {:?}", other),
    }
    match expect_msg(&mut rx_bob).await {
        ServerMessage::GameStart {
            matchmade: true,
            opponent_name,
            ..
        } => assert_eq!(opponent_name.as_deref(), Some("Alice")),
        other => panic!("expected game_start, got {:?}", other),
    }
    expect_no_msg(&mut rx_a2);
}

#[tokio::test]
async fn matchmaking_requires_identity_and_purges_stale_entries() {
    let state = make_state();
    let _rx_anon = connect(&state, "anon");
    assert_eq!(
        state.matchmaking_join("anon", 300).await,
        Err(GameError::UsernameRequired)
    );

    let _rx_ghost = connect(&state, "ghost");
    state.set_username("ghost", "Ghost").unwrap();
    state.matchmaking_join("ghost", 300).await.unwrap();
    // The connection vanishes without going through the disconnect path.
    state.players.remove("ghost");

    let mut rx_bob = connect(&state, "bob");
    state.set_username("bob", "Bob").unwrap();
    state.matchmaking_join("bob", 300).await.unwrap();
    // The stale entry was purged during the scan, so Bob waits alone.
    match expect_msg(&mut rx_bob).await {
        ServerMessage::MatchmakingWaiting { queue_size: 1 } => {}
        other => panic!("expected matchmaking_waiting, got {:?}", other),
    }

    state.matchmaking_cancel("bob").await;
    match expect_msg(&mut rx_bob).await {
        ServerMessage::MatchmakingCancelled => {}
        other => panic!("expected matchmaking_cancelled, got {:?}", other),
    }
    let queues = state.queues.lock().await;
    assert!(queues.get(&300).map_or(true, |b| b.is_empty()));
}

#[tokio::test]
async fn entering_a_room_withdraws_a_queued_player() {
    let state = make_state();
    let mut rx_alice = connect(&state, "alice");
    let mut rx_bob = connect(&state, "bob");
    let mut rx_carol = connect(&state, "carol");
    state.set_username("alice", "Alice").unwrap();
    state.set_username("bob", "Bob").unwrap();
    state.set_username("carol", "Carol").unwrap();

    state.matchmaking_join("alice", 300).await.unwrap();
    expect_msg(&mut rx_alice).await; // matchmaking_waiting

    // Alice hosts a room instead and Bob joins it.
    state.create_room("alice", 300).await.unwrap();
    let room_id = match expect_msg(&mut rx_alice).await {
        ServerMessage::RoomCreated { room_id } => room_id,
        other => panic!("expected room_created, got {:?}", other),
    };
    state.join_room("bob", &room_id).await.unwrap();
    expect_msg(&mut rx_alice).await; // game_start
    expect_msg(&mut rx_bob).await; // game_start

    // Carol must not be paired against Alice's abandoned queue entry.
    state.matchmaking_join("carol", 300).await.unwrap();
    match expect_msg(&mut rx_carol).await {
        ServerMessage::MatchmakingWaiting { queue_size: 1 } => {}
        other => panic!("expected matchmaking_waiting, got {:?}", other),
    }
    expect_no_msg(&mut rx_alice);
    assert_eq!(
        state
            .identity_to_room
            .get("alice")
            .map(|r| r.value().clone()),
        Some(room_id)
    );
}

#[tokio::test]
async fn matchmaking_skips_entries_whose_identity_entered_a_room() {
    let state = make_state();
    let mut rx_a1 = connect(&state, "a1");
    let mut rx_a2 = connect(&state, "a2");
    let mut rx_bob = connect(&state, "bob");
    state.set_username("a1", "Alice").unwrap();
    state.set_username("a2", "ALICE").unwrap();
    state.set_username("bob", "Bob").unwrap();

    // Alice queues on one connection, then hosts a room on another. The
    // queued entry belongs to a live connection, but the identity is taken.
    state.matchmaking_join("a1", 300).await.unwrap();
    expect_msg(&mut rx_a1).await; // matchmaking_waiting
    state.create_room("a2", 300).await.unwrap();
    expect_msg(&mut rx_a2).await; // room_created

    state.matchmaking_join("bob", 300).await.unwrap();
    match expect_msg(&mut rx_bob).await {
        ServerMessage::MatchmakingWaiting { queue_size: 1 } => {}
        other => panic!("expected matchmaking_waiting, got {:?}", other),
    }
    expect_no_msg(&mut rx_a1);
}

#[test]
fn identity_claim_is_first_writer_wins() {
    let state = make_state();
    assert_eq!(state.claim_identity(Some("Alice"), "AAAAA"), Ok(()));
    // Re-claiming the held room is fine; a second room is refused.
    assert_eq!(state.claim_identity(Some("alice"), "AAAAA"), Ok(()));
    assert_eq!(
        state.claim_identity(Some("ALICE"), "BBBBB"),
        Err(GameError::AlreadyInSession)
    );
    // Anonymous connections claim nothing.
    assert_eq!(state.claim_identity(None, "BBBBB"), Ok(()));
    state.release_identity(Some("Alice"), "AAAAA");
    assert_eq!(state.claim_identity(Some("Alice"), "BBBBB"), Ok(()));
}

#[tokio::test]
async fn rate_limiter_sliding_window() {
    let state = make_state();
    let _rx = connect(&state, "p1");

    for _ in 0..RATE_CAP {
        assert!(state.check_rate_limit("p1"));
    }
    assert!(!state.check_rate_limit("p1"));
    // Unknown connections are never admitted.
    assert!(!state.check_rate_limit("nobody"));
}

#[tokio::test]
async fn reconnect_within_grace_restores_session() {
    let state = make_state();
    let mut rx1 = connect(&state, "p1");
    let mut rx2 = connect(&state, "p2");
    let room_id = start_game(&state, "p1", "Alice", "p2", "Bob", &mut rx1, &mut rx2).await;
    let side = side_of(&state, &room_id, "p1").await;

    Arc::clone(&state).handle_disconnect("p1").await;
    match expect_msg(&mut rx2).await {
        ServerMessage::OpponentDisconnected => {}
        other => panic!("expected opponent_disconnected, got {:?}", other),
    }
    let stale_generation = {
        let room_lock = state.rooms.get(&room_id).unwrap();
        let session = room_lock.read().await;
        assert!(session.seat(side).is_vacated());
        session.seat_generation(side)
    };

    // A fresh connection reclaims the seat.
    let mut rx1b = connect(&state, "p1b");
    state.reconnect("p1b", &room_id, side).await;
    match expect_msg(&mut rx1b).await {
        ServerMessage::Reconnected {
            color,
            time: 300,
            opponent_name,
            ..
        } => {
            assert_eq!(color, side);
            assert_eq!(opponent_name.as_deref(), Some("Bob"));
        }
        other => panic!("expected reconnected, got {:?}", other),
    }
    match expect_msg(&mut rx2).await {
        ServerMessage::OpponentReconnected => {}
        other => panic!("expected opponent_reconnected, got {:?}", other),
    }

    // The grace timer from the old disconnect fires late and must no-op.
    state.expire_seat(&room_id, side, stale_generation).await;
    let room_lock = state.rooms.get(&room_id).expect("room must survive");
    let session = room_lock.read().await;
    assert_eq!(session.phase, Phase::Active);
    assert!(session.outcome.is_none());
    assert_eq!(session.seat_of("p1b"), Some(side));
    expect_no_msg(&mut rx2);
}

#[tokio::test]
async fn grace_expiry_forfeits_the_vacated_side() {
    let state = make_state();
    state.accounts.create("Alice", "pw").unwrap();
    state.accounts.create("Bob", "pw").unwrap();

    let mut rx1 = connect(&state, "p1");
    let mut rx2 = connect(&state, "p2");
    let room_id = start_game(&state, "p1", "Alice", "p2", "Bob", &mut rx1, &mut rx2).await;
    let side = side_of(&state, &room_id, "p1").await;

    Arc::clone(&state).handle_disconnect("p1").await;
    expect_msg(&mut rx2).await; // opponent_disconnected

    let generation = {
        let room_lock = state.rooms.get(&room_id).unwrap();
        let session = room_lock.read().await;
        session.seat_generation(side)
    };
    state.expire_seat(&room_id, side, generation).await;

    match expect_msg(&mut rx2).await {
        ServerMessage::OpponentDisconnectedFinal => {}
        other => panic!("expected opponent_disconnected_final, got {:?}", other),
    }
    assert!(state.rooms.get(&room_id).is_none());
    // Forfeit recorded once, identity guard released.
    let bob = state.accounts.stats("bob").unwrap();
    assert_eq!(bob.wins, 1);
    let alice = state.accounts.stats("alice").unwrap();
    assert_eq!(alice.losses, 1);
    assert!(!state.identity_to_room.contains_key("alice"));
    assert!(!state.identity_to_room.contains_key("bob"));

    // A too-late reconnect is refused.
    let mut rx1b = connect(&state, "p1b");
    state.reconnect("p1b", &room_id, side).await;
    match expect_msg(&mut rx1b).await {
        ServerMessage::ReconnectFailed { .. } => {}
        other => panic!("expected reconnect_failed, got {:?}", other),
    }
}

#[tokio::test]
async fn each_seat_keeps_its_own_grace_timer() {
    let state = make_state();
    state.accounts.create("Alice", "pw").unwrap();
    state.accounts.create("Bob", "pw").unwrap();

    let mut rx1 = connect(&state, "p1");
    let mut rx2 = connect(&state, "p2");
    let room_id = start_game(&state, "p1", "Alice", "p2", "Bob", &mut rx1, &mut rx2).await;
    let p1_side = side_of(&state, &room_id, "p1").await;

    Arc::clone(&state).handle_disconnect("p1").await;
    expect_msg(&mut rx2).await; // opponent_disconnected
    let p1_generation = {
        let room_lock = state.rooms.get(&room_id).unwrap();
        let session = room_lock.read().await;
        session.seat_generation(p1_side)
    };

    // The opponent leaving afterwards must not invalidate p1's timer.
    Arc::clone(&state).handle_disconnect("p2").await;

    state.expire_seat(&room_id, p1_side, p1_generation).await;
    assert!(state.rooms.get(&room_id).is_none());
    // The first side to run out of grace is the one that forfeits.
    let alice = state.accounts.stats("alice").unwrap();
    assert_eq!((alice.wins, alice.losses), (0, 1));
    let bob = state.accounts.stats("bob").unwrap();
    assert_eq!((bob.wins, bob.losses), (1, 0));
}

#[tokio::test]
async fn late_grace_timer_stays_silent_after_the_game_ended() {
    let state = make_state();
    state.accounts.create("Alice", "pw").unwrap();
    state.accounts.create("Bob", "pw").unwrap();

    let mut rx1 = connect(&state, "p1");
    let mut rx2 = connect(&state, "p2");
    let room_id = start_game(&state, "p1", "Alice", "p2", "Bob", &mut rx1, &mut rx2).await;
    let p1_side = side_of(&state, &room_id, "p1").await;

    Arc::clone(&state).handle_disconnect("p1").await;
    expect_msg(&mut rx2).await; // opponent_disconnected
    let generation = {
        let room_lock = state.rooms.get(&room_id).unwrap();
        let session = room_lock.read().await;
        session.seat_generation(p1_side)
    };

    // The survivor resigns during the grace window.
    state.handle_resign("p2").await;

    // When the timer fires the game is already over: the room is reaped
    // without a second recorded result or a spurious final notice.
    state.expire_seat(&room_id, p1_side, generation).await;
    assert!(state.rooms.get(&room_id).is_none());
    expect_no_msg(&mut rx2);
    let alice = state.accounts.stats("alice").unwrap();
    assert_eq!((alice.wins, alice.losses), (1, 0));
    let bob = state.accounts.stats("bob").unwrap();
    assert_eq!((bob.wins, bob.losses), (0, 1));
}

#[tokio::test]
async fn waiting_room_dies_with_its_host() {
    let state = make_state();
    let mut rx1 = connect(&state, "p1");
    state.set_username("p1", "Alice").unwrap();
    state.create_room("p1", 300).await.unwrap();
    let room_id = match expect_msg(&mut rx1).await {
        ServerMessage::RoomCreated { room_id } => room_id,
        other => panic!("expected room_created, got {:?}", other),
    };

    Arc::clone(&state).handle_disconnect("p1").await;
    assert!(state.rooms.get(&room_id).is_none());
    assert!(!state.identity_to_room.contains_key("alice"));

    // Alice can immediately host a new game on a fresh connection.
    let mut rx1b = connect(&state, "p1b");
    state.set_username("p1b", "Alice").unwrap();
    state.create_room("p1b", 300).await.unwrap();
    match expect_msg(&mut rx1b).await {
        ServerMessage::RoomCreated { .. } => {}
        other => panic!("expected room_created, got {:?}", other),
    }
}

#[tokio::test]
async fn chat_is_capped_and_escaped() {
    let state = make_state();
    let mut rx1 = connect(&state, "p1");
    let mut rx2 = connect(&state, "p2");
    start_game(&state, "p1", "Alice", "p2", "Bob", &mut rx1, &mut rx2).await;

    state.handle_chat("p1", "<b>gg & gl</b>").await;
    match expect_msg(&mut rx2).await {
        ServerMessage::Chat { message } => {
            assert_eq!(message, "&lt;b&gt;gg &amp; gl&lt;/b&gt;");
        }
        other => panic!("expected chat, got {:?}", other),
    }

    let long: String = std::iter::repeat('x').take(500).collect();
    state.handle_chat("p2", &long).await;
    match expect_msg(&mut rx1).await {
        ServerMessage::Chat { message } => assert_eq!(message.chars().count(), CHAT_MAX),
        other => panic!("expected chat, got {:?}", other),
    }
}

#[tokio::test]
async fn sync_messages_are_relayed_verbatim() {
    let state = make_state();
    let mut rx1 = connect(&state, "p1");
    let mut rx2 = connect(&state, "p2");
    start_game(&state, "p1", "Alice", "p2", "Bob", &mut rx1, &mut rx2).await;

    state.handle_sync("p1", ServerMessage::SyncRequest).await;
    match expect_msg(&mut rx2).await {
        ServerMessage::SyncRequest => {}
        other => panic!("expected sync_request, got {:?}", other),
    }

    let moves = serde_json::json!(["e2e4", "e7e5"]);
    let clocks = serde_json::json!({"white": 212, "black": 198});
    state
        .handle_sync(
            "p2",
            ServerMessage::SyncState {
                moves: moves.clone(),
                clocks: clocks.clone(),
            },
        )
        .await;
    match expect_msg(&mut rx1).await {
        ServerMessage::SyncState {
            moves: m,
            clocks: c,
        } => {
            assert_eq!(m, moves);
            assert_eq!(c, clocks);
        }
        other => panic!("expected sync_state, got {:?}", other),
    }
}
