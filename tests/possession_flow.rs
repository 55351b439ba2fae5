mod support;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use disc_session_server::game::intent::{ButtonEdges, InputIntent};
use disc_session_server::game::possession::{Hand, TokenState};
use disc_session_server::game::{DenyReason, RequestKind};
use disc_session_server::ws::protocol::ServerMsg;

use support::{catch, throw_hold, throw_press, throw_release, Table};

fn throw_from(table: &mut Table, seat: usize, hold_ticks: usize) {
    let mut intents = vec![InputIntent::default(); table.avatars.len()];
    intents[seat] = throw_press();
    table.step(&intents);
    intents[seat] = throw_hold();
    for _ in 0..hold_ticks {
        table.step(&intents);
    }
    intents[seat] = throw_release();
    table.step(&intents);
}

#[test]
fn first_player_starts_with_disc_and_everyone_agrees() {
    let table = Table::seat(3);
    let a = table.id(0);

    assert_eq!(table.holders(), vec![a]);
    assert!(table.avatars[0].holds());
    for avatar in &table.avatars {
        assert_eq!(avatar.mirror().holder(), Some(a));
    }
    assert!(!table.core.authority().is_relaying(), "all observers acknowledged");
}

#[test]
fn throw_then_catch_round_trip() {
    let mut table = Table::seat(2);
    let (a, b) = (table.id(0), table.id(1));

    // 0.6 s of charge at 50 Hz: press step plus 29 held steps
    throw_from(&mut table, 0, 29);

    assert!(table.holders().is_empty());
    assert!(!table.avatars[0].holds());
    assert!(matches!(
        table.core.authority().token().state,
        TokenState::InFlight { thrower, .. } if thrower == a
    ));
    let launch = table.avatars[1]
        .mirror()
        .last_launch()
        .expect("observer saw the launch");
    assert!((launch.launch.magnitude() - 1.8 * 1.8 * 10.0).abs() < 1e-2);

    // B catches the disc that nobody holds
    table.step(&[InputIntent::default(), catch()]);
    assert_eq!(table.holders(), vec![b]);
    assert!(table.avatars[1].holds());
    assert_eq!(table.avatars[0].mirror().holder(), Some(b));
}

#[test]
fn catch_attaches_to_the_selected_hand_for_observers() {
    let mut table = Table::seat(2);
    let a = table.id(0);

    let left = InputIntent {
        hand_left: true,
        ..Default::default()
    };
    table.step(&[left, InputIntent::default()]);
    assert_eq!(table.avatars[0].hand(), Hand::Left);

    throw_from(&mut table, 0, 10);
    assert!(table.holders().is_empty());

    let catch_left = InputIntent {
        catch_held: true,
        hand_left: true,
        ..Default::default()
    };
    table.step(&[catch_left, InputIntent::default()]);

    assert_eq!(table.holders(), vec![a]);
    assert!(matches!(
        table.avatars[1].mirror().token().state,
        TokenState::Held {
            holder,
            hand: Hand::Left,
            visible: true,
            ..
        } if holder == a
    ));
}

#[test]
fn catch_while_held_is_denied_to_requester_only() {
    let mut table = Table::seat(2);
    let b = table.id(1);
    let epoch = table.core.authority().epoch();

    table.step(&[InputIntent::default(), catch()]);

    assert_eq!(table.core.authority().epoch(), epoch, "no state change");
    let denied = |inbox: &Vec<ServerMsg>| {
        inbox.iter().any(|m| {
            matches!(
                m,
                ServerMsg::RequestDenied {
                    request: RequestKind::Catch,
                    reason: DenyReason::HeldByOther,
                    ..
                }
            )
        })
    };
    assert!(denied(&table.inboxes[1]));
    assert!(!denied(&table.inboxes[0]));
    assert!(!table.avatars[1].holds());
    assert!(!table.avatars[1].has_outstanding_request());
    assert_ne!(table.holders(), vec![b]);
}

#[test]
fn holder_leaving_frees_the_disc() {
    let mut table = Table::seat(2);
    let a = table.id(0);
    let out = table.core.handle_input(support::input(
        a,
        disc_session_server::ws::protocol::ClientMsg::LeaveSession,
    ));
    table.dispatch(out);

    assert_eq!(table.core.authority().token().state, TokenState::Unclaimed);
    assert_eq!(table.avatars[1].mirror().holder(), None);

    table.step(&[InputIntent::default(), catch()]);
    assert_eq!(table.holders(), vec![table.id(1)]);
}

#[test]
fn random_play_keeps_a_single_holder() {
    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let mut table = Table::seat(4);
    let mut throw_levels = vec![false; 4];

    for _ in 0..1_500 {
        let intents: Vec<InputIntent> = (0..4)
            .map(|seat| {
                let was = throw_levels[seat];
                let now = if rng.gen_bool(0.1) { !was } else { was };
                throw_levels[seat] = now;
                InputIntent {
                    catch_held: rng.gen_bool(0.3),
                    throw: ButtonEdges {
                        down: now && !was,
                        held: now,
                        up: !now && was,
                    },
                    ..Default::default()
                }
            })
            .collect();
        table.step(&intents);

        let holders = table.holders();
        assert!(holders.len() <= 1);
        let authority_holder = table.core.authority().holder();
        assert_eq!(holders.first().copied(), authority_holder);
        for avatar in &table.avatars {
            assert_eq!(avatar.mirror().holder(), authority_holder);
            assert_eq!(avatar.holds(), authority_holder == Some(avatar.user_id()));
        }
    }
    assert!(table.core.launches() > 0, "the script should throw at least once");
}
