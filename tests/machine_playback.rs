// End-to-end playback tests: physical machine over an in-memory serial link, and the simulator

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

use cnc_melody::config::{Config, SerialConfig};
use cnc_melody::hardware::{HardwareError, PortOpener};
use cnc_melody::machine::{GrblMachine, Machine, MachineError, SimulatedMachine};
use cnc_melody::motion::AxisId;
use cnc_melody::song::NoteInterval;

/// Hands out duplex pipe ends as "serial ports", one per connect.
struct DuplexOpener {
    ports: Mutex<VecDeque<DuplexStream>>,
}

#[async_trait]
impl PortOpener for DuplexOpener {
    type Port = DuplexStream;

    async fn open(&self, _settings: &SerialConfig) -> Result<DuplexStream, HardwareError> {
        let port = self.ports.lock().unwrap().pop_front();
        port.ok_or(HardwareError::NotConnected)
    }
}

#[derive(Default, Clone, Copy)]
struct Script {
    /// Answer the n-th G1 (1-based) with an error line.
    error_on_move: Option<usize>,
    /// Hang up when the n-th G1 arrives.
    hang_up_on_move: Option<usize>,
}

/// Minimal GRBL: greets on wake-up, answers `$$` with acceleration settings,
/// `ok` to everything else unless the script says otherwise.
async fn fake_grbl(stream: DuplexStream, script: Script, log: Arc<Mutex<Vec<String>>>) {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();
    let mut greeted = false;
    let mut moves = 0;
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            if !greeted {
                greeted = true;
                if write.write_all(b"Grbl 1.1h ['$' for help]\r\n").await.is_err() {
                    return;
                }
            }
            continue;
        }
        log.lock().unwrap().push(line.clone());
        let reply = if line == "$$" {
            "$110=8000.000\r\n$120=500.000\r\n$121=400.000\r\n$122=100.000\r\nok\r\n"
        } else if line.starts_with("G1") {
            moves += 1;
            if Some(moves) == script.hang_up_on_move {
                return;
            }
            if Some(moves) == script.error_on_move {
                "error:33\r\n"
            } else {
                "ok\r\n"
            }
        } else {
            "ok\r\n"
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// One fake controller per script, connected in order. All of them log to the same list.
fn machine_with_sessions(scripts: &[Script], config: Config) -> (GrblMachine<DuplexOpener>, Arc<Mutex<Vec<String>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut ports = VecDeque::new();
    for script in scripts {
        let (ours, theirs) = tokio::io::duplex(4096);
        tokio::spawn(fake_grbl(theirs, *script, log.clone()));
        ports.push_back(ours);
    }
    let opener = DuplexOpener {
        ports: Mutex::new(ports),
    };
    (GrblMachine::with_opener(config, opener), log)
}

fn machine_with(script: Script, config: Config) -> (GrblMachine<DuplexOpener>, Arc<Mutex<Vec<String>>>) {
    machine_with_sessions(&[script], config)
}

/// X plays A4 over [0, 1), Y plays A3 over [0.5, 1.5): three slices.
fn duet() -> Vec<NoteInterval> {
    vec![
        NoteInterval::new(AxisId::X, 440.0, 0.0, 1.0),
        NoteInterval::new(AxisId::Y, 220.0, 0.5, 1.0),
    ]
}

fn moves_in(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|l| l.starts_with("G1"))
        .cloned()
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_grbl_machine_plays_song() {
    let mut config = Config::default();
    config.init.home = true;
    config.init.park = true;
    let (mut machine, log) = machine_with(Script::default(), config.clone());

    machine.connect().await.unwrap();
    assert!(machine.is_connected());
    machine.initialize(&config.init).await.unwrap();
    let report = machine.play_notes(&duet()).await.unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.slices_played, 3);
    assert_eq!(report.commands_emitted, 3);
    assert_eq!(report.transport.commands_sent, 3);
    assert_eq!(report.transport.ok, 3);
    assert!((report.final_positions[&AxisId::X] - 116.5).abs() < 1e-6);
    assert!((report.final_positions[&AxisId::Y] - 108.25).abs() < 1e-6);

    let sent = log.lock().unwrap().clone();
    assert_eq!(&sent[..5], &["$H", "G90", "G0 X100.0000 Y100.0000 F8000.00", "G91", "$$"]);
    let moves = moves_in(&log);
    assert_eq!(moves[0], "G1 X8.2500 F990.00");
    assert!(moves[1].starts_with("G1 X8.2500 Y4.1250 "));
    assert!(moves[2].starts_with("G1 Y4.1250 "));

    // The link survives the session for further commands.
    assert!(machine.is_connected());
    assert!(machine.send_command("G91").await.unwrap().is_ok());
    machine.disconnect().await;
    assert!(!machine.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_controller_error_does_not_stop_playback() {
    let script = Script {
        error_on_move: Some(2),
        ..Default::default()
    };
    let (mut machine, log) = machine_with(script, Config::default());
    machine.connect().await.unwrap();
    let report = machine.play_notes(&duet()).await.unwrap();

    assert_eq!(report.commands_emitted, 3);
    assert_eq!(report.transport.errors, 1);
    assert_eq!(report.transport.ok, 2);
    assert_eq!(moves_in(&log).len(), 3);
    assert!(!machine.cancel_flag().is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_lost_link_ends_session_and_releases_port() {
    let script = Script {
        hang_up_on_move: Some(2),
        ..Default::default()
    };
    let (mut machine, log) = machine_with(script, Config::default());
    machine.connect().await.unwrap();
    let result = machine.play_notes(&duet()).await;

    assert!(matches!(result, Err(MachineError::Hardware(_))), "{:?}", result);
    assert!(!machine.is_connected());
    assert!(machine.cancel_flag().is_cancelled());
    assert_eq!(moves_in(&log).len(), 2);
    assert!(matches!(machine.send_command("G91").await, Err(MachineError::NotConnected)));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_lost_link_plays_again() {
    let broken = Script {
        hang_up_on_move: Some(1),
        ..Default::default()
    };
    let (mut machine, log) = machine_with_sessions(&[broken, Script::default()], Config::default());
    let a4 = vec![NoteInterval::new(AxisId::X, 440.0, 0.0, 1.0)];

    machine.connect().await.unwrap();
    assert!(machine.play_notes(&a4).await.is_err());
    assert!(machine.cancel_flag().is_cancelled());
    // Positions of moves that never ran are forgotten.
    assert_eq!(machine.axis_states()[&AxisId::X].position, 100.0);

    machine.disconnect().await;
    machine.connect().await.unwrap();
    assert!(!machine.cancel_flag().is_cancelled());
    let report = machine.play_notes(&a4).await.unwrap();
    assert!(!report.cancelled);
    assert_eq!(report.commands_emitted, 1);
    assert_eq!(report.transport.ok, 1);
    assert_eq!(moves_in(&log), vec!["G1 X16.5000 F990.00", "G1 X16.5000 F990.00"]);
}

#[tokio::test(start_paused = true)]
async fn test_playback_requires_connection_and_known_axes() {
    let (mut machine, _log) = machine_with(Script::default(), Config::default());
    assert!(matches!(machine.play_notes(&duet()).await, Err(MachineError::NotConnected)));

    machine.connect().await.unwrap();
    let z = vec![NoteInterval::new(AxisId::Z, 440.0, 0.0, 1.0)];
    assert!(matches!(
        machine.play_notes(&z).await,
        Err(MachineError::UnknownAxis(AxisId::Z))
    ));
    let bad = vec![NoteInterval::new(AxisId::X, -1.0, 0.0, 1.0)];
    assert!(matches!(machine.play_notes(&bad).await, Err(MachineError::Song(_))));
}

#[tokio::test(start_paused = true)]
async fn test_simulated_machine_matches_planned_positions() {
    let config = Config::default();
    let mut machine = SimulatedMachine::new(config.clone());
    machine.connect().await.unwrap();
    machine.initialize(&config.init).await.unwrap();
    let report = machine.play_notes(&duet()).await.unwrap();

    assert_eq!(report.commands_emitted, 3);
    assert_eq!(report.transport.ok, 3);
    let simulated = machine.controller().positions();
    for (axis, position) in &report.final_positions {
        assert!((simulated[axis] - position).abs() < 1e-6);
    }
    // Start plus one entry per move.
    assert_eq!(machine.controller().history().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_simulated_playback_reports_cancel() {
    let mut machine = SimulatedMachine::new(Config::default());
    machine.connect().await.unwrap();
    machine.cancel_flag().cancel();
    let report = machine.play_notes(&duet()).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.commands_emitted, 0);
}
