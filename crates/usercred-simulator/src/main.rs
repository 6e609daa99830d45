//! Desktop simulator for the usercred core.
//!
//! Runs a scripted session against the [`UserCredentialService`]: users and
//! credentials are added, moved and deleted, checksums are printed, and two
//! Credential Learn sessions run on a virtual clock (one times out, one
//! completes). Learn reports travel through a static channel exactly as they
//! would to a transport task on the device.
//!
//! # Usage
//!
//! | Invocation                        | Storage                                  |
//! |-----------------------------------|------------------------------------------|
//! | `usercred-simulator`              | In memory, discarded on exit             |
//! | `usercred-simulator <directory>`  | One file per storage area in `directory` |
//!
//! With a directory, a `config.postcard` file in it replaces the default
//! configuration. Set `RUST_LOG=debug` to see the store internals.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Sender};
use embassy_time::Duration;
use log::{error, info, warn};

use usercred_core::learn::{Initiator, LearnEvent, LearnOperation, ManualTimer};
use usercred_core::storage::{Area, MemoryStorage, NvmStorage};
use usercred_core::types::{Credential, CredentialId, CredentialType, Modifier, NameEncoding, User};
use usercred_core::validation::CredentialRejection;
use usercred_core::{Config, Error, UserCredentialService};

/// Learn reports waiting for the (simulated) transport.
static LEARN_EVENTS: Channel<CriticalSectionRawMutex, LearnEvent, 8> = Channel::new();

/// Virtual time between simulated capture ticks.
const TICK: Duration = Duration::from_secs(1);

type Service<S> =
    UserCredentialService<S, ManualTimer, Sender<'static, CriticalSectionRawMutex, LearnEvent, 8>>;

// ---------------------------------------------------------------------------
// File-backed storage
// ---------------------------------------------------------------------------

/// Stores each [`Area`] in its own file under a directory.
struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self, area: Area) -> PathBuf {
        self.root.join(format!("{:?}.bin", area).to_lowercase())
    }
}

impl NvmStorage for FileStorage {
    type Error = io::Error;

    fn read(&mut self, area: Area, offset: usize, buf: &mut [u8]) -> Result<(), Self::Error> {
        buf.fill(0);
        let mut file = match File::open(self.path(area)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        file.seek(SeekFrom::Start(offset as u64))?;

        // Bytes past the end of the file read as zero.
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(())
    }

    fn write(&mut self, area: Area, offset: usize, data: &[u8]) -> Result<(), Self::Error> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.path(area))?;
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(data)?;
        file.sync_data()
    }
}

fn load_config(dir: &Path) -> Config {
    let path = dir.join("config.postcard");
    match fs::read(&path) {
        Ok(bytes) => match Config::from_postcard(&bytes) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring {}: {}", path.display(), e);
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

/// Logs every learn report the core has queued.
fn drain_learn_events() {
    while let Ok(event) = LEARN_EVENTS.try_receive() {
        match event {
            LearnEvent::CaptureRequested {
                target,
                steps,
                timeout,
            } => info!(
                "[learn] capture {:?} slot {} for user {}: {} step(s), {}s per step",
                target.kind,
                target.slot,
                target.uuid,
                steps,
                timeout.as_secs()
            ),
            LearnEvent::Status(report) => info!(
                "[learn] status {:?} (0x{:02X}), {} step(s) left",
                report.status,
                report.status.to_u8(),
                report.steps_remaining
            ),
            LearnEvent::Stored(metadata) => info!(
                "[learn] stored {:?} slot {} ({} bytes, {:?})",
                metadata.id.kind, metadata.id.slot, metadata.length, metadata.modifier.kind
            ),
            LearnEvent::Failed { target, reason } => {
                warn!("[learn] {:?} slot {} failed: {}", target.kind, target.slot, reason)
            }
        }
    }
}

/// Advances the virtual clock until the learn timer fires or `limit` passes.
fn run_clock<S: NvmStorage>(service: &mut Service<S>, limit: Duration) {
    let mut elapsed = Duration::from_ticks(0);
    while elapsed < limit {
        elapsed += TICK;
        if service.learn_mut().timer_mut().advance(TICK) {
            info!("Learn timer fired after {}s", elapsed.as_secs());
            service.learn_timeout();
            return;
        }
    }
}

fn log_checksums<S: NvmStorage>(service: &mut Service<S>) -> Result<(), Error> {
    info!(
        "Checksums: all users 0x{:04X}, PIN 0x{:04X}, RFID 0x{:04X}",
        service.all_users_checksum()?,
        service.credential_type_checksum(CredentialType::PinCode)?,
        service.credential_type_checksum(CredentialType::RfidCode)?
    );
    Ok(())
}

fn list_users<S: NvmStorage>(service: &mut Service<S>) -> Result<(), Error> {
    let mut uuid = 0;
    while let Some(next) = service.next_user(uuid)? {
        uuid = next;
        let user = service.get_user(uuid)?;
        let credentials = service.count_credentials(Some(uuid), None)?;
        info!(
            "  user {:>3} {:<12} {:?}, {} credential(s), checksum 0x{:04X}",
            uuid,
            String::from_utf8_lossy(&user.name),
            user.kind,
            credentials,
            service.user_checksum(uuid)?
        );
    }
    Ok(())
}

fn credential(
    uuid: u16,
    kind: CredentialType,
    slot: u16,
    data: &[u8],
) -> Result<Credential, Error> {
    Credential::new(CredentialId::new(uuid, kind, slot), Modifier::local(), data)
        .ok_or(Error::Credential(CredentialRejection::InvalidLength(data.len())))
}

fn run<S: NvmStorage>(storage: S, config: Config) -> Result<(), Error> {
    let mut service = UserCredentialService::new(
        storage,
        config,
        ManualTimer::new(),
        LEARN_EVENTS.sender(),
    )?;

    if service.user_count() > 0 {
        info!("Existing database:");
        list_users(&mut service)?;
        info!("Clearing it for a fresh run");
        service.delete_all_users()?;
    }

    // --- Users ----------------------------------------------------------
    let owner = User::new(1)
        .with_name(NameEncoding::Ascii, b"Owner")
        .unwrap_or_else(|| User::new(1));
    service.add_user(owner)?;
    service.add_user(User::new(2))?;
    service.add_user(User::new(5))?;

    // --- Credentials ----------------------------------------------------
    service.add_credential(&credential(1, CredentialType::PinCode, 1, b"1234")?)?;
    service.add_credential(&credential(2, CredentialType::PinCode, 2, b"5678")?)?;
    service.add_credential(&credential(
        2,
        CredentialType::RfidCode,
        1,
        &[0x04, 0xA2, 0x19, 0x7C],
    )?)?;

    match service.add_credential(&credential(5, CredentialType::PinCode, 1, b"0000")?) {
        Err(e) => info!("Second PIN in slot 1 rejected as expected: {}", e),
        Ok(()) => warn!("Second PIN in slot 1 was accepted"),
    }
    match service.add_credential(&credential(5, CredentialType::PinCode, 3, b"1234")?) {
        Err(e) => info!("Duplicate PIN rejected as expected: {}", e),
        Ok(()) => warn!("Duplicate PIN was accepted"),
    }

    service.set_admin_code(b"97531")?;
    info!("Database after setup:");
    list_users(&mut service)?;
    log_checksums(&mut service)?;

    // --- Move -----------------------------------------------------------
    service.move_credential(CredentialType::RfidCode, 2, 1, 5, 4)?;
    info!("Moved RFID tag from user 2 to slot 4 of user 5");
    log_checksums(&mut service)?;

    // --- Learn: timeout -------------------------------------------------
    // PIN slot 3 is still free: the duplicate PIN above was refused.
    let target = CredentialId::new(5, CredentialType::PinCode, 3);
    service.learn_start(LearnOperation::Add, target, 7, Initiator::Local)?;
    drain_learn_events();
    run_clock(&mut service, Duration::from_secs(8));
    drain_learn_events();

    // --- Learn: success over several steps -------------------------------
    let target = CredentialId::new(5, CredentialType::PinCode, 6);
    service.learn_start(
        LearnOperation::Add,
        target,
        0,
        Initiator::Remote { node_id: 1 },
    )?;
    service.learn_step_start(1)?;
    run_clock(&mut service, Duration::from_secs(3));
    service.learn_step_retry(1)?;
    run_clock(&mut service, Duration::from_secs(3));
    drain_learn_events();
    service.learn_read_done(b"246810")?;
    drain_learn_events();

    // --- Teardown -------------------------------------------------------
    let removed = service.delete_credentials(Some(5), Some(CredentialType::PinCode))?;
    info!("Removed {} PIN code(s) of user 5", removed);
    service.delete_user(2)?;

    info!("Final database:");
    list_users(&mut service)?;
    log_checksums(&mut service)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() {
    env_logger::init();
    info!("Starting usercred simulator");

    let result = match std::env::args_os().nth(1) {
        Some(dir) => {
            let dir = PathBuf::from(dir);
            let config = load_config(&dir);
            match FileStorage::new(&dir) {
                Ok(storage) => {
                    info!("Using file storage in {}", dir.display());
                    run(storage, config)
                }
                Err(e) => {
                    error!("Cannot use {}: {}", dir.display(), e);
                    std::process::exit(1);
                }
            }
        }
        None => {
            info!("Using in-memory storage");
            run(MemoryStorage::new(), Config::default())
        }
    };

    if let Err(e) = result {
        error!("Simulation failed: {}", e);
        std::process::exit(1);
    }
    info!("Simulator exiting");
}
