// Copyright (C) 2019  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

use super::*;

use crate::chain::{ChainState, Timing};
use crate::config::OptionDefault;
use crate::io::test_utils::FakeWindow;
use crate::nonce::NonceResponse;
use crate::work::WorkDescriptor;

const TEST_CONFIG: &str = r#"
[format]
version = "beta"
model = "Antminer S19"

[bus]
read_timeout_ms = 2
"#;

fn driver(window: &Arc<FakeWindow>) -> Driver<Arc<FakeWindow>> {
    let config = config::Config::from_str(TEST_CONFIG).expect("invalid test configuration");
    let mut driver = Driver::new(window.clone(), &config).expect("cannot create driver");
    for chain_id in driver.chain_mask().iter() {
        driver
            .chain_mut(chain_id)
            .expect("detected chain missing")
            .set_timing(Timing::none());
    }
    driver
}

#[test]
fn test_driver_chains_follow_plug_mask() {
    let window = Arc::new(FakeWindow::with_chips(0b101, 2));
    let mut driver = driver(&window);
    assert_eq!(driver.chain_mask().bits(), 0b101);
    let ids: Vec<usize> = driver.chains().iter().map(|c| c.chain_id()).collect();
    assert_eq!(ids, vec![0, 2]);
    match driver.chain_mut(1) {
        Err(e) => assert_eq!(
            e.kind(),
            ErrorKind::Chain(1, "hashboard not present".to_string())
        ),
        Ok(_) => panic!("chain 1 is not plugged"),
    }
    assert_eq!(driver.take_chains().len(), 2);
    assert!(driver.chains().is_empty());
}

#[test]
fn test_take_single_chain() {
    let window = Arc::new(FakeWindow::with_chips(0b111, 2));
    let mut driver = driver(&window);

    let mut chain = driver.take_chain(1).expect("chain 1 missing");
    let ids: Vec<usize> = driver.chains().iter().map(|c| c.chain_id()).collect();
    assert_eq!(ids, vec![0, 2]);
    assert!(driver.take_chain(1).is_err());

    chain.init().expect("bring-up failed");
    driver.put_chains(vec![chain]);
    let states: Vec<(usize, ChainState)> = driver
        .chains()
        .iter()
        .map(|c| (c.chain_id(), c.state()))
        .collect();
    assert_eq!(
        states,
        vec![
            (0, ChainState::Unconfigured),
            (1, ChainState::Ready),
            (2, ChainState::Unconfigured)
        ]
    );
}

#[test]
fn test_eeprom_frequency_reaches_chains() {
    let mut config = config::Config::from_str(TEST_CONFIG).expect("invalid test configuration");
    config.set_eeprom_frequency(0, 500);
    let window = Arc::new(FakeWindow::with_chips(0b011, 2));
    let driver = Driver::new(window, &config).expect("cannot create driver");
    let frequencies: Vec<OptionDefault<u32>> = driver
        .chains()
        .iter()
        .map(|c| c.config().frequency)
        .collect();
    assert_eq!(
        frequencies,
        vec![
            OptionDefault::Default(500),
            OptionDefault::Default(config::DEFAULT_FREQUENCY)
        ]
    );
}

#[test]
fn test_end_to_end() {
    let window = Arc::new(FakeWindow::new());
    let mut driver = driver(&window);

    let chain = driver.chain_mut(0).expect("chain 0 missing");
    chain.init().expect("bring-up failed");
    assert_eq!(chain.state(), ChainState::Ready);
    assert_eq!(chain.chip_count(), 4);

    // chip 0 echoes the final ticket mask
    assert_eq!(
        window.chip_register(0, bm1398::TICKET_MASK_REG),
        Some(bm1398::TicketMaskReg::MINING)
    );

    window.script_nonce(0x1234_5680, 0x002a_0000, 3);
    let work = WorkDescriptor::new(0x2a, [0x11; 12], [[0x22; 32]; 4]).expect("valid work");
    chain.submit_work(&work).expect("work rejected");
    assert_eq!(window.work_words().len(), work::WORK_PACKET_WORDS);

    let nonce_rx = driver.nonce_rx().clone();
    let mut nonces = Vec::new();
    for _ in 0..10 {
        nonces.extend(nonce_rx.drain(16).expect("drain failed"));
    }
    assert_eq!(
        nonces,
        vec![NonceResponse {
            nonce: 0x1234_5680,
            chain_id: 0,
            work_id: 0x2a,
            work_id_or_crc: false,
        }]
    );
}

#[test]
fn test_parallel_bring_up() {
    let window = Arc::new(FakeWindow::with_chips(0b111, 3));
    let mut driver = driver(&window);

    let handles: Vec<_> = driver
        .take_chains()
        .into_iter()
        .map(|mut chain| {
            std::thread::spawn(move || {
                chain.init().expect("bring-up failed");
                chain
            })
        })
        .collect();
    let chains: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("bring-up thread panicked"))
        .collect();
    driver.put_chains(chains);

    assert_eq!(driver.chains().len(), 3);
    for chain in driver.chains() {
        assert_eq!(chain.state(), ChainState::Ready);
        assert_eq!(chain.chip_count(), 3);
        assert_eq!(
            window.assigned_addresses(chain.chain_id()),
            vec![0x00, 0x55, 0xaa]
        );
    }
}
