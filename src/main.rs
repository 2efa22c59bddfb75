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

use bosminer_s19::logging::macros::*;

use bosminer_s19::bm1398::{self, ChipAddress};
use bosminer_s19::chain::{ChainState, HashChain};
use bosminer_s19::command::Interface;
use bosminer_s19::config;
use bosminer_s19::error::{self, ErrorKind};
use bosminer_s19::io::{self, mmap::MmapWindow};
use bosminer_s19::logging;
use bosminer_s19::work::{self, WorkDescriptor};
use bosminer_s19::Driver;

use std::thread;
use std::time::{Duration, Instant};

/// Highest chip register address read by `scan`
const SCAN_LAST_REGISTER: u8 = 0xfc;
/// Maximum number of nonces read in one drain
const DRAIN_BATCH: usize = 64;
const DRAIN_INTERVAL: Duration = Duration::from_millis(10);

fn parse_number<T: std::str::FromStr>(
    matches: &clap::ArgMatches,
    name: &str,
) -> error::Result<Option<T>> {
    match matches.value_of(name) {
        Some(value) => match value.parse::<T>() {
            Ok(number) => Ok(Some(number)),
            Err(_) => Err(ErrorKind::Config(format!(
                "invalid value '{}' of argument '{}'",
                value, name
            )))?,
        },
        None => Ok(None),
    }
}

fn required_chain(matches: &clap::ArgMatches) -> error::Result<usize> {
    match parse_number(matches, "chain")? {
        Some(chain) => Ok(chain),
        None => Err(ErrorKind::Config("missing hash chain index".to_string()))?,
    }
}

fn status(driver: &Driver<MmapWindow>) {
    let core = driver.core();
    info!("Hardware version: {:#010x}", core.hardware_version());
    info!("FPGA chip id: {:#010x}", core.fpga_chip_id());
    info!(
        "Hash chains: {:?} (mask {:#05b})",
        driver.chain_mask().iter().collect::<Vec<_>>(),
        driver.chain_mask().bits()
    );
    info!("CRC errors: {}", core.crc_error_count());
    info!("Work FIFO space: {}", driver.work_tx().fifo_space());
    info!("Nonce FIFO entries: {}", driver.nonce_rx().poll_count());
}

/// Bring up chains in parallel, one thread per chain
fn init(driver: &mut Driver<MmapWindow>, chain: Option<usize>) -> error::Result<()> {
    let chains: Vec<HashChain<MmapWindow>> = match chain {
        Some(chain_id) => vec![driver.take_chain(chain_id)?],
        None => driver.take_chains(),
    };

    let handles: Vec<_> = chains
        .into_iter()
        .map(|mut chain| {
            thread::spawn(move || {
                let result = chain.init();
                (chain, result)
            })
        })
        .collect();

    let mut failed = 0;
    let mut finished = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.join() {
            Ok((chain, Ok(()))) => {
                info!(
                    "Chain {}: {:?}, {} chips at {} MHz",
                    chain.chain_id(),
                    chain.state(),
                    chain.chip_count(),
                    chain.frequency().unwrap_or(0)
                );
                finished.push(chain);
            }
            Ok((chain, Err(e))) => {
                error!("Chain {}: {:?}: {}", chain.chain_id(), chain.state(), e);
                finished.push(chain);
                failed += 1;
            }
            Err(_) => {
                error!("Chain bring-up thread panicked");
                failed += 1;
            }
        }
    }
    driver.put_chains(finished);
    if failed > 0 {
        Err(ErrorKind::General(format!(
            "{} hash chain(s) failed to initialize",
            failed
        )))?
    }
    Ok(())
}

/// Read every register of chip 0 and report which ones answer
fn scan(
    driver: &mut Driver<MmapWindow>,
    chain_id: usize,
    unknown_only: bool,
) -> error::Result<()> {
    let chain = driver.chain_mut(chain_id)?;
    chain.init()?;
    let command = chain.command().clone();

    let mut answered = 0;
    let mut timeouts = 0;
    for register in (0..=SCAN_LAST_REGISTER).step_by(4) {
        if unknown_only && bm1398::KNOWN_REGISTERS.contains(&register) {
            continue;
        }
        match command.read_raw(
            chain_id,
            ChipAddress::One(0),
            register,
            command.read_timeout(),
        ) {
            Ok(value) => {
                info!("Register {:#04x}: {:#010x}", register, value);
                answered += 1;
            }
            Err(e) => match e.kind() {
                ErrorKind::BusTimeout(_) => {
                    debug!("Register {:#04x}: no response", register);
                    timeouts += 1;
                }
                _ => Err(e)?,
            },
        }
    }
    info!(
        "Chain {}: {} register(s) answered, {} timed out",
        chain_id, answered, timeouts
    );
    Ok(())
}

/// Job `index` of a deterministic test sequence
fn test_work(index: u32) -> error::Result<WorkDescriptor> {
    let mut header_tail = [0u8; work::HEADER_TAIL_SIZE];
    header_tail[..4].copy_from_slice(&index.to_be_bytes());
    let mut midstates = [[0u8; work::MIDSTATE_SIZE]; work::MIDSTATE_COUNT];
    for (i, midstate) in midstates.iter_mut().enumerate() {
        for (j, byte) in midstate.iter_mut().enumerate() {
            *byte = (index as usize + i * work::MIDSTATE_SIZE + j) as u8;
        }
    }
    WorkDescriptor::new(index, header_tail, midstates)
}

fn work_test(
    driver: &mut Driver<MmapWindow>,
    chain_id: usize,
    count: u32,
    duration: Duration,
) -> error::Result<()> {
    driver.chain_mut(chain_id)?.init()?;
    driver.core().enable_work_send();

    let chain = driver.chain_mut(chain_id)?;
    for index in 0..count {
        let work = test_work(index)?;
        if index == 0 {
            debug!(
                "First work packet: {}",
                hex::encode(&work::encode_work(&work, chain_id)[..])
            );
        }
        chain.submit_work(&work)?;
    }
    info!("Chain {}: submitted {} job(s)", chain_id, count);

    let nonce_rx = driver.nonce_rx().clone();
    let deadline = Instant::now() + duration;
    let mut received = 0;
    while Instant::now() < deadline {
        for nonce in nonce_rx.drain(DRAIN_BATCH)? {
            info!("{}", nonce);
            received += 1;
        }
        thread::sleep(DRAIN_INTERVAL);
    }
    info!(
        "Chain {}: received {} nonce(s) in {:?}",
        chain_id, received, duration
    );
    Ok(())
}

fn run(matches: clap::ArgMatches) -> error::Result<()> {
    let config_path = matches
        .value_of("config")
        .unwrap_or(config::DEFAULT_CONFIG_PATH);
    let mut config = config::Config::parse(config_path)?;
    if let Some(path) = matches.value_of("device") {
        config.set_device_path(path.to_string());
    }
    if let Some(frequency) = parse_number(&matches, "frequency")? {
        config.set_frequency(frequency);
    }
    if let Some(frequency) = parse_number(&matches, "eeprom-frequency")? {
        for chain_id in 0..io::MAX_CHAINS {
            config.set_eeprom_frequency(chain_id, frequency);
        }
    }

    let mut driver = Driver::open(&config)?;
    match matches.subcommand() {
        ("status", Some(_)) => status(&driver),
        ("init", Some(matches)) => init(&mut driver, parse_number(matches, "chain")?)?,
        ("scan", Some(matches)) => scan(
            &mut driver,
            required_chain(matches)?,
            matches.is_present("unknown"),
        )?,
        ("work-test", Some(matches)) => work_test(
            &mut driver,
            required_chain(matches)?,
            parse_number(matches, "count")?.unwrap_or(1),
            Duration::from_secs(parse_number(matches, "seconds")?.unwrap_or(5)),
        )?,
        _ => status(&driver),
    }

    for chain in driver.chains() {
        if chain.state() == ChainState::Faulted {
            warn!("Chain {} left faulted", chain.chain_id());
        }
    }
    Ok(())
}

fn main() {
    let chain_arg = || {
        clap::Arg::with_name("chain")
            .long("chain")
            .value_name("N")
            .help("Hash chain index")
            .takes_value(true)
    };
    let app = clap::App::new("s19-chain")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Antminer S19 hash chain bring-up and diagnostics")
        .arg(
            clap::Arg::with_name("config")
                .long("config")
                .help("Set config file path")
                .required(false)
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("device")
                .long("device")
                .help("FPGA device file")
                .required(false)
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("frequency")
                .long("frequency")
                .help("Set chip frequency (in MHz)")
                .required(false)
                .takes_value(true),
        )
        .arg(
            clap::Arg::with_name("eeprom-frequency")
                .long("eeprom-frequency")
                .value_name("MHZ")
                .help("Manufacturer chip frequency from hashboard EEPROM (in MHz)")
                .required(false)
                .takes_value(true),
        )
        .subcommand(clap::SubCommand::with_name("status").about("Show FPGA status"))
        .subcommand(
            clap::SubCommand::with_name("init")
                .about("Initialize hash chains")
                .arg(chain_arg()),
        )
        .subcommand(
            clap::SubCommand::with_name("scan")
                .about("Read chip registers of an initialized chain")
                .arg(chain_arg().required(true))
                .arg(
                    clap::Arg::with_name("all")
                        .long("all")
                        .help("Read all registers"),
                )
                .arg(
                    clap::Arg::with_name("unknown")
                        .long("unknown")
                        .help("Read only undocumented registers"),
                )
                .group(
                    clap::ArgGroup::with_name("registers")
                        .args(&["all", "unknown"])
                        .required(true),
                ),
        )
        .subcommand(
            clap::SubCommand::with_name("work-test")
                .about("Send test jobs and print received nonces")
                .arg(chain_arg().required(true))
                .arg(
                    clap::Arg::with_name("count")
                        .long("count")
                        .value_name("K")
                        .help("Number of jobs to submit")
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::with_name("seconds")
                        .long("seconds")
                        .value_name("S")
                        .help("How long to wait for nonces")
                        .takes_value(true),
                ),
        );

    let matches = app.get_matches();
    let log_guard = logging::setup_for_app(config::ASYNC_LOGGER_DRAIN_CHANNEL_SIZE);

    if let Err(e) = run(matches) {
        error!("{}", e);
        // flush the asynchronous drain before exiting
        drop(log_guard);
        std::process::exit(1);
    }
}
