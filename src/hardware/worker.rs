// src/hardware/worker.rs - Drains the command channel onto the line protocol
use tokio::io::{AsyncRead, AsyncWrite};

use crate::cancel::CancelFlag;
use crate::gcode::ProtocolResponse;
use crate::hardware::{CommandReceiver, HardwareError, LineLink};

/// Statistics for transport command processing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportReport {
    pub commands_sent: u64,
    pub ok: u64,
    pub errors: u64,
    pub alarms: u64,
    pub resets: u64,
    pub last_command: Option<String>,
}

impl TransportReport {
    pub(crate) fn record(&mut self, command: String, response: &ProtocolResponse) {
        self.commands_sent += 1;
        match response {
            ProtocolResponse::Ok => self.ok += 1,
            ProtocolResponse::Error(_) => self.errors += 1,
            ProtocolResponse::Alarm(_) => self.alarms += 1,
            ProtocolResponse::ControllerReset(_) => self.resets += 1,
        }
        self.last_command = Some(command);
    }
}

/// Single consumer of the command channel. Sends one command, waits for its
/// response, then takes the next; controller errors are logged and skipped,
/// transport faults end the session.
pub struct TransportWorker<S> {
    link: LineLink<S>,
    commands: CommandReceiver,
    cancel: CancelFlag,
}

impl<S> TransportWorker<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(link: LineLink<S>, commands: CommandReceiver, cancel: CancelFlag) -> Self {
        Self { link, commands, cancel }
    }

    /// Run until the channel is closed and drained, the session is cancelled,
    /// or the link fails. The link is handed back so the caller decides
    /// whether to keep or release it.
    pub async fn run(mut self) -> (LineLink<S>, Result<TransportReport, HardwareError>) {
        let mut report = TransportReport::default();
        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Transport stopping: session cancelled");
                break;
            }
            let Some(command) = self.commands.dequeue().await else {
                tracing::debug!("Command channel closed, transport done");
                break;
            };
            let text = command.to_string();
            match self.link.exchange(&text).await {
                Ok(exchange) => {
                    match &exchange.response {
                        ProtocolResponse::Ok => {}
                        ProtocolResponse::Error(e) => tracing::warn!("Controller error for '{}': {}", text, e),
                        ProtocolResponse::Alarm(a) => tracing::warn!("Controller alarm for '{}': {}", text, a),
                        ProtocolResponse::ControllerReset(banner) => {
                            tracing::warn!("Controller reset detected after '{}': {}", text, banner)
                        }
                    }
                    report.record(text, &exchange.response);
                }
                Err(e) => {
                    tracing::error!("Transport fault while sending '{}': {}", text, e);
                    self.cancel.cancel();
                    return (self.link, Err(e));
                }
            }
        }
        (self.link, Ok(report))
    }
}
