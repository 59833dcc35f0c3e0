//! Discovery engine against the simulated field.
//!
//! Every test builds a tag population, switches the field on and drives
//! `PollStateMachine` through the same `Transceiver` the reader core uses.

use nfc_common::discovery::config::PollConfig;
use nfc_common::discovery::types::{OperatingMode, PollState, Technology};
use nfc_common::rf::transceiver::Transceiver;
use nfc_discovery::{PollError, PollOutcome, PollStateMachine};
use nfc_hal::drivers::simulation::tags::{I18000p3m3Tag, TypeATag, TypeBTag, TypeVTag};
use nfc_hal::drivers::simulation::{SimTag, SimulatedField};

fn machine(tech: Technology, limit: u8) -> PollStateMachine {
    let mut config = PollConfig::default();
    config.enabled = vec![tech];
    config.set_device_limit(tech, limit);
    PollStateMachine::new(config).expect("valid poll config")
}

fn field<I>(tags: I) -> SimulatedField
where
    I: IntoIterator,
    I::Item: Into<SimTag>,
{
    let mut field = tags
        .into_iter()
        .fold(SimulatedField::new(), |field, tag| field.with_tag(tag));
    field.field_on().expect("field on");
    field
}

fn type_a(uid: &[u8], atqa: u16) -> TypeATag {
    TypeATag::new(uid, atqa, 0x00, None).unwrap()
}

fn type_b(pupi0: u8) -> TypeBTag {
    TypeBTag::new(&[pupi0, 0x11, 0x22, 0x33], [0; 4], [0x00, 0x81, 0x71], 0).unwrap()
}

fn type_v(low: u8) -> TypeVTag {
    TypeVTag::new(&[0xE0, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, low], 0x00, 0).unwrap()
}

fn m3(last: u8) -> I18000p3m3Tag {
    I18000p3m3Tag::new(&[0xE2, 0x00, 0x00, last], &[], None).unwrap()
}

fn ids(machine: &PollStateMachine, tech: Technology) -> Vec<Vec<u8>> {
    machine
        .registry(tech)
        .iter()
        .map(|tag| tag.id.to_vec())
        .collect()
}

// ─── Type A ─────────────────────────────────────────────────────────

#[test]
fn type_a_two_tags_resolved_and_both_activatable() {
    let mut field = field([type_a(&[1, 2, 3, 4], 0x0004), type_a(&[1, 2, 3, 5], 0x0002)]);
    let mut sm = machine(Technology::TypeA, 2);

    let detected = sm.detect_technology(&mut field).unwrap();
    assert!(detected.has(Technology::TypeA));
    assert!(sm.pending().has(Technology::TypeA));

    let resolution = sm.resolve_collisions(&mut field, Technology::TypeA).unwrap();
    assert_eq!(resolution.resolved, 2);
    assert!(!resolution.pending);
    assert_eq!(
        ids(&sm, Technology::TypeA),
        vec![vec![1, 2, 3, 5], vec![1, 2, 3, 4]]
    );

    sm.activate(&mut field, Technology::TypeA, 0).unwrap();
    assert_eq!(sm.activated(), Some((Technology::TypeA, 0)));
    sm.activate(&mut field, Technology::TypeA, 1).unwrap();
    assert_eq!(sm.activated(), Some((Technology::TypeA, 1)));
}

#[test]
fn type_a_device_limit_leaves_tags_pending() {
    let tags = || {
        [
            type_a(&[1, 2, 3, 4], 0x0004),
            type_a(&[1, 2, 3, 5], 0x0004),
            type_a(&[1, 2, 3, 6], 0x0004),
        ]
    };

    let mut limited = field(tags());
    let mut sm = machine(Technology::TypeA, 2);
    sm.detect_technology(&mut limited).unwrap();
    let resolution = sm.resolve_collisions(&mut limited, Technology::TypeA).unwrap();
    assert_eq!(resolution.resolved, 2);
    assert!(resolution.pending);
    assert_eq!(
        ids(&sm, Technology::TypeA),
        vec![vec![1, 2, 3, 5], vec![1, 2, 3, 6]]
    );

    let mut full = field(tags());
    let mut sm = machine(Technology::TypeA, 3);
    sm.detect_technology(&mut full).unwrap();
    let resolution = sm.resolve_collisions(&mut full, Technology::TypeA).unwrap();
    assert_eq!(resolution.resolved, 3);
    assert!(!resolution.pending);
}

#[test]
fn type_a_cascade_tag_in_single_size_uid_is_rejected() {
    let mut field = field([type_a(&[0x88, 2, 3, 4], 0x0004)]);
    let mut sm = machine(Technology::TypeA, 1);
    assert_eq!(
        sm.poll(&mut field),
        Err(PollError::Protocol("cascade tag in final UID level"))
    );
    assert_eq!(sm.next_state(), PollState::Detection);
}

#[test]
fn type_a_double_size_uid() {
    let uid = [0x04, 0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6];
    let mut field = field([TypeATag::new(&uid, 0x0044, 0x20, None).unwrap()]);
    let mut sm = machine(Technology::TypeA, 1);
    assert_eq!(
        sm.poll(&mut field),
        Ok(PollOutcome::DeviceActivated {
            tech: Technology::TypeA,
            index: 0
        })
    );
    assert_eq!(ids(&sm, Technology::TypeA), vec![uid.to_vec()]);
    assert!(sm.registry(Technology::TypeA).get(0).unwrap().activation.is_some());
}

#[test]
fn detect_time_hlta_returns_ready_tag_to_idle() {
    let mut field = field([type_a(&[1, 2, 3, 4], 0x0004)]);
    let mut sm = machine(Technology::TypeA, 1);

    // HLTA to a READY tag is a sleep request: REQA still finds it.
    assert!(sm.detect_technology(&mut field).unwrap().has(Technology::TypeA));
    assert!(sm.detect_technology(&mut field).unwrap().has(Technology::TypeA));
}

#[test]
fn type_a_halted_tag_found_again_by_wupa() {
    let mut field = field([type_a(&[1, 2, 3, 4], 0x0004)]);
    let mut sm = machine(Technology::TypeA, 1);

    assert_eq!(
        sm.poll(&mut field),
        Ok(PollOutcome::DeviceActivated {
            tech: Technology::TypeA,
            index: 0
        })
    );
    sm.deactivate(&mut field, Technology::TypeA, 0).unwrap();
    assert_eq!(sm.activated(), None);

    // HALT state: REQA is ignored, WUPA during resolution wakes it.
    assert!(sm.detect_technology(&mut field).unwrap().is_empty());
    let resolution = sm.resolve_collisions(&mut field, Technology::TypeA).unwrap();
    assert_eq!(resolution.resolved, 1);
    assert_eq!(ids(&sm, Technology::TypeA), vec![vec![1, 2, 3, 4]]);

    sm.activate(&mut field, Technology::TypeA, 0).unwrap();
    assert_eq!(sm.activated(), Some((Technology::TypeA, 0)));
}

#[test]
fn emvco_detection_wakes_halted_tags() {
    let mut field = field([type_a(&[1, 2, 3, 4], 0x0004)]);
    let mut config = PollConfig::default();
    config.enabled = vec![Technology::TypeA];
    config.mode = OperatingMode::Emvco;
    let mut sm = PollStateMachine::new(config).unwrap();

    assert!(sm.detect_technology(&mut field).unwrap().has(Technology::TypeA));
    assert!(sm.detect_technology(&mut field).unwrap().has(Technology::TypeA));
}

#[test]
fn removal_reports_presence_until_tag_leaves() {
    let mut field = field([type_a(&[1, 2, 3, 4], 0x0004)]);
    let mut sm = machine(Technology::TypeA, 1);

    assert!(matches!(sm.poll(&mut field), Ok(PollOutcome::DeviceActivated { .. })));
    assert_eq!(sm.next_state(), PollState::Removal);

    assert_eq!(
        sm.poll(&mut field),
        Ok(PollOutcome::TechDetected(Technology::TypeA.mask()))
    );
    assert_eq!(sm.next_state(), PollState::Removal);

    assert!(field.remove_tag(&[1, 2, 3, 4]));
    assert_eq!(sm.poll(&mut field), Ok(PollOutcome::NoTechDetected));
    assert_eq!(sm.next_state(), PollState::Detection);
    assert_eq!(sm.activated(), None);
}

// ─── Type B ─────────────────────────────────────────────────────────

#[test]
fn type_b_single_tag_activated() {
    let mut field = field([type_b(0x01)]);
    let mut sm = machine(Technology::TypeB, 1);
    assert_eq!(
        sm.poll(&mut field),
        Ok(PollOutcome::DeviceActivated {
            tech: Technology::TypeB,
            index: 0
        })
    );
    assert_eq!(ids(&sm, Technology::TypeB), vec![vec![0x01, 0x11, 0x22, 0x33]]);
}

#[test]
fn type_b_halted_tag_found_again_by_wupb() {
    let mut field = field([type_b(0x01)]);
    let mut sm = machine(Technology::TypeB, 1);

    assert_eq!(
        sm.poll(&mut field),
        Ok(PollOutcome::DeviceActivated {
            tech: Technology::TypeB,
            index: 0
        })
    );
    sm.deactivate(&mut field, Technology::TypeB, 0).unwrap();
    assert_eq!(sm.activated(), None);

    // HLTB: REQB gets no ATQB, the WUPB opening resolution does.
    assert!(sm.detect_technology(&mut field).unwrap().is_empty());
    let resolution = sm.resolve_collisions(&mut field, Technology::TypeB).unwrap();
    assert_eq!(resolution.resolved, 1);
    assert_eq!(ids(&sm, Technology::TypeB), vec![vec![0x01, 0x11, 0x22, 0x33]]);

    sm.activate(&mut field, Technology::TypeB, 0).unwrap();
    assert_eq!(sm.activated(), Some((Technology::TypeB, 0)));
}

#[test]
fn type_b_slotted_resolution_respects_device_limit() {
    let expected = [(1, true), (2, true), (3, false), (4, false)];
    for (limit, pending) in expected {
        let mut field = field([type_b(0x01), type_b(0x02), type_b(0x03)]);
        let mut sm = machine(Technology::TypeB, limit);
        assert!(sm.detect_technology(&mut field).unwrap().has(Technology::TypeB));

        let resolution = sm.resolve_collisions(&mut field, Technology::TypeB).unwrap();
        assert_eq!(resolution.resolved, usize::from(limit.min(3)), "limit {limit}");
        assert_eq!(resolution.pending, pending, "limit {limit}");
    }
}

#[test]
fn type_b_first_slots_resolved_in_order() {
    let mut field = field([type_b(0x01), type_b(0x02), type_b(0x03)]);
    let mut sm = machine(Technology::TypeB, 2);
    sm.detect_technology(&mut field).unwrap();
    sm.resolve_collisions(&mut field, Technology::TypeB).unwrap();
    assert_eq!(
        ids(&sm, Technology::TypeB),
        vec![vec![0x02, 0x11, 0x22, 0x33], vec![0x01, 0x11, 0x22, 0x33]]
    );
}

// ─── Type V ─────────────────────────────────────────────────────────

#[test]
fn type_v_slotted_resolution_respects_device_limit() {
    for (limit, pending) in [(1, true), (2, true), (3, false), (4, false)] {
        let mut field = field([type_v(0x01), type_v(0x02), type_v(0x03)]);
        let mut sm = machine(Technology::TypeV, limit);
        assert!(sm.detect_technology(&mut field).unwrap().has(Technology::TypeV));

        let resolution = sm.resolve_collisions(&mut field, Technology::TypeV).unwrap();
        assert_eq!(resolution.resolved, usize::from(limit.min(3)), "limit {limit}");
        assert_eq!(resolution.pending, pending, "limit {limit}");
    }
}

#[test]
fn type_v_identifiers_are_in_wire_order() {
    let mut field = field([type_v(0x07)]);
    let mut sm = machine(Technology::TypeV, 1);
    assert!(matches!(sm.poll(&mut field), Ok(PollOutcome::DeviceActivated { .. })));
    assert_eq!(
        ids(&sm, Technology::TypeV),
        vec![vec![0x07, 0x00, 0x00, 0x00, 0x00, 0x01, 0x04, 0xE0]]
    );
}

// ─── ISO18000-3M3 ───────────────────────────────────────────────────

#[test]
fn m3_inventory_respects_device_limit() {
    for (limit, pending) in [(1, true), (2, true), (3, false)] {
        let mut field = field([m3(1), m3(2), m3(3)]);
        let mut sm = machine(Technology::I18000p3m3, limit);
        assert!(sm.detect_technology(&mut field).unwrap().has(Technology::I18000p3m3));

        let resolution = sm.resolve_collisions(&mut field, Technology::I18000p3m3).unwrap();
        assert_eq!(resolution.resolved, usize::from(limit), "limit {limit}");
        assert_eq!(resolution.pending, pending, "limit {limit}");
    }
}

#[test]
fn m3_identical_uii_exhausts_round_budget() {
    let mut field = field([m3(9), m3(9)]);
    let mut sm = machine(Technology::I18000p3m3, 2);
    sm.detect_technology(&mut field).unwrap();

    let resolution = sm.resolve_collisions(&mut field, Technology::I18000p3m3).unwrap();
    assert!(resolution.exhausted);
    assert_eq!(resolution.resolved, 0);
}

#[test]
fn m3_uii_lengths_round_trip() {
    for words in 1..=31usize {
        let uii: Vec<u8> = (0..words * 2).map(|i| 0xE0 ^ i as u8).collect();
        let mut field = field([I18000p3m3Tag::new(&uii, &[], None).unwrap()]);
        let mut sm = machine(Technology::I18000p3m3, 1);
        sm.detect_technology(&mut field).unwrap();
        let resolution = sm.resolve_collisions(&mut field, Technology::I18000p3m3).unwrap();
        assert_eq!(resolution.resolved, 1, "{words} words");
        assert_eq!(ids(&sm, Technology::I18000p3m3), vec![uii], "{words} words");
    }
}

// ─── Mixed field ────────────────────────────────────────────────────

#[test]
fn detection_covers_every_enabled_technology() {
    let mut field = SimulatedField::new()
        .with_tag(type_a(&[1, 2, 3, 4], 0x0004))
        .with_tag(type_b(0x01))
        .with_tag(type_v(0x01))
        .with_tag(m3(1));
    field.field_on().unwrap();

    let mut sm = PollStateMachine::new(PollConfig {
        enabled: Technology::ALL.to_vec(),
        ..PollConfig::default()
    })
    .unwrap();
    let detected = sm.detect_technology(&mut field).unwrap();
    assert_eq!(detected.technologies().collect::<Vec<_>>(), Technology::ALL.to_vec());

    // Type A wins by priority.
    assert_eq!(
        sm.poll(&mut field),
        Ok(PollOutcome::DeviceActivated {
            tech: Technology::TypeA,
            index: 0
        })
    );
}
