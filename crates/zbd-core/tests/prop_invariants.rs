// SPDX-License-Identifier: MIT OR Apache-2.0

//! Property-based checks for the quantified invariants of §8: random
//! sequences of write/discard operations against a small in-memory device,
//! checked after every step rather than only at the end, since the
//! invariants are defined to hold "between any two externally observable
//! operations".

mod common;

use std::sync::Arc;

use common::MemZonedDevice;
use proptest::prelude::*;
use zbd_block::{Lba, Pba, BLOCK_SIZE};
use zbd_core::{Engine, EngineConfig, HostRequest, RequestOp};

const ZONE_COUNT: usize = 6;
const BLOCKS_PER_ZONE: u64 = 16;
const TOTAL_BLOCKS: u64 = ZONE_COUNT as u64 * BLOCKS_PER_ZONE;
const MAX_OPS: usize = 60;

#[derive(Clone, Debug)]
enum Op {
    Write { lba: u64, fill: u8 },
    Discard { lba: u64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    // Keep writes well clear of the metadata zone's address space (zone 0)
    // by restricting LBAs to the second zone onward; the metadata zone
    // never appears as an allocation target, so LBA 0 simply lands wherever
    // the round-robin cursor sends it -- no restriction is needed there,
    // but we cap the LBA range to keep prop cases from forcing excessive
    // reclaim churn.
    let lba = 0u64..TOTAL_BLOCKS;
    prop_oneof![
        3 => (lba.clone(), any::<u8>()).prop_map(|(lba, fill)| Op::Write { lba, fill }),
        1 => lba.prop_map(|lba| Op::Discard { lba }),
    ]
}

fn check_invariants(engine: &Engine, model: &[Option<u8>]) {
    for lba in 0..TOTAL_BLOCKS {
        match engine.lba_lookup(Lba::new(lba)).unwrap() {
            Some(pba) => {
                // Invariant 1: fwd[l] = p => rev[p] = l and bitmap[p] = 1.
                assert_eq!(engine.pba_reverse(pba), Some(Lba::new(lba)));
                assert!(engine.pba_is_valid(pba));
                assert!(model[lba as usize].is_some(), "lba {lba} mapped but model says unmapped");
            }
            None => {
                assert!(model[lba as usize].is_none(), "lba {lba} unmapped but model says mapped");
            }
        }
    }

    // Invariant 2: bitmap[p] = 1 => lookup(reverse(p)) = p.
    for z in 0..ZONE_COUNT {
        for offset in 0..BLOCKS_PER_ZONE as u32 {
            let pba = Pba::new(engine.geometry().join_pba(z, offset));
            if engine.pba_is_valid(pba) {
                let lba = engine.pba_reverse(pba).expect("valid bit implies a reverse mapping");
                assert_eq!(engine.lba_lookup(lba).unwrap(), Some(pba));
            }
        }
        // Invariant 3: weight(z) = popcount(bitmap_slice(z)).
        engine.zone_weight_cross_check(z);

        // Invariant 4: for Sequential zones, no live bit past the write
        // pointer.
        if engine.geometry().zone_kind(z) != zbd_block::ZoneKind::Conventional {
            let wp = engine.zone_wp(z);
            for offset in wp..BLOCKS_PER_ZONE as u32 {
                let pba = Pba::new(engine.geometry().join_pba(z, offset));
                assert!(!engine.pba_is_valid(pba), "zone {z} offset {offset} valid past wp {wp}");
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        .. ProptestConfig::default()
    })]

    #[test]
    fn invariants_hold_after_every_write_and_discard(ops in prop::collection::vec(op_strategy(), 1..=MAX_OPS)) {
        let device = Arc::new(MemZonedDevice::new(ZONE_COUNT, BLOCKS_PER_ZONE));
        let engine = Engine::new(device, EngineConfig::default()).unwrap();
        let mut model: Vec<Option<u8>> = vec![None; TOTAL_BLOCKS as usize];

        for op in &ops {
            match *op {
                Op::Write { lba, fill } => {
                    let result = engine.map_request(HostRequest {
                        op: RequestOp::Write,
                        start_lba: Lba::new(lba),
                        nr_blocks: 1,
                        write_data: Some(vec![fill; BLOCK_SIZE as usize]),
                    });
                    // NoSpace is a legitimate outcome once the small device
                    // fills with live data; the model simply stops tracking
                    // that write and invariants are still checked below.
                    if result.is_ok() {
                        model[lba as usize] = Some(fill);
                    }
                }
                Op::Discard { lba } => {
                    engine
                        .map_request(HostRequest {
                            op: RequestOp::Discard,
                            start_lba: Lba::new(lba),
                            nr_blocks: 1,
                            write_data: None,
                        })
                        .unwrap();
                    model[lba as usize] = None;
                }
            }
            check_invariants(&engine, &model);
        }

        // Round-trip law: every still-live LBA reads back its last payload.
        for lba in 0..TOTAL_BLOCKS {
            if let Some(fill) = model[lba as usize] {
                let resp = engine
                    .map_request(HostRequest {
                        op: RequestOp::Read,
                        start_lba: Lba::new(lba),
                        nr_blocks: 1,
                        write_data: None,
                    })
                    .unwrap();
                prop_assert_eq!(resp.read_data.unwrap(), vec![fill; BLOCK_SIZE as usize]);
            }
        }
    }
}
