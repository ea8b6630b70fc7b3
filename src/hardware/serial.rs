// src/hardware/serial.rs - Half-duplex line protocol over any byte stream
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::gcode::{ProtocolResponse, WAKE_UP};
use crate::hardware::HardwareError;

/// Result of one command/response exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub response: ProtocolResponse,
    /// Non-terminal lines received before the response, e.g. `$$` settings.
    pub info: Vec<String>,
}

/// Newline-terminated request/response link. Only one exchange is ever in
/// flight: `exchange` writes a command and reads until a terminal line.
pub struct LineLink<S> {
    stream: BufReader<S>,
    /// Bytes of a line whose newline has not arrived yet.
    pending: Vec<u8>,
}

impl<S> LineLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            pending: Vec::new(),
        }
    }

    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    pub async fn write_line(&mut self, line: &str) -> Result<(), HardwareError> {
        let framed = format!("{}\n", line);
        self.stream.write_all(framed.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read one line without its terminator. End of stream is a transport fault.
    ///
    /// Cancel-safe: a partially received line is kept for the next call.
    pub async fn read_line(&mut self) -> Result<String, HardwareError> {
        let n = self.stream.read_until(b'\n', &mut self.pending).await?;
        if n == 0 && !self.pending.ends_with(b"\n") {
            return Err(HardwareError::Closed);
        }
        let raw = std::mem::take(&mut self.pending);
        let line = String::from_utf8(raw)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Send one command and block until the controller answers it.
    pub async fn exchange(&mut self, command: &str) -> Result<Exchange, HardwareError> {
        let command = command.trim();
        self.write_line(command).await?;

        let mut info = Vec::new();
        loop {
            let line = self.read_line().await?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            tracing::debug!("Sent: {} | Received: {}", command, line);
            match ProtocolResponse::classify(line) {
                Some(response) => return Ok(Exchange { response, info }),
                None => {
                    tracing::trace!("Controller info: {}", line);
                    info.push(line.to_string());
                }
            }
        }
    }

    /// Wake the controller and swallow its startup banner.
    ///
    /// Returns the banner lines read before `drain_timeout` of silence.
    pub async fn wake(&mut self, delay: Duration, drain_timeout: Duration) -> Result<Vec<String>, HardwareError> {
        self.stream.write_all(WAKE_UP.as_bytes()).await?;
        self.stream.flush().await?;
        tokio::time::sleep(delay).await;

        let mut banner = Vec::new();
        loop {
            match tokio::time::timeout(drain_timeout, self.read_line()).await {
                Ok(Ok(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        tracing::info!("Controller: {}", line);
                        banner.push(line.to_string());
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => break,
            }
        }
        Ok(banner)
    }
}

impl<S> std::fmt::Debug for LineLink<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineLink")
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_exchange_ok() {
        let mock = Builder::new().write(b"G91\n").read(b"ok\r\n").build();
        let mut link = LineLink::new(mock);
        let exchange = link.exchange("G91").await.unwrap();
        assert_eq!(exchange.response, ProtocolResponse::Ok);
        assert!(exchange.info.is_empty());
    }

    #[tokio::test]
    async fn test_exchange_skips_blank_and_info_lines() {
        let mock = Builder::new()
            .write(b"$$\n")
            .read(b"\r\n$120=500.000\r\n\n$121=800.000\r\nok\r\n")
            .build();
        let mut link = LineLink::new(mock);
        let exchange = link.exchange("$$").await.unwrap();
        assert_eq!(exchange.response, ProtocolResponse::Ok);
        assert_eq!(exchange.info, vec!["$120=500.000", "$121=800.000"]);
    }

    #[tokio::test]
    async fn test_exchange_error_line_is_terminal() {
        let mock = Builder::new()
            .write(b"G1 X1.0000 F10.00\n")
            .read(b"error: bad command\n")
            .build();
        let mut link = LineLink::new(mock);
        let exchange = link.exchange("  G1 X1.0000 F10.00 ").await.unwrap();
        assert_eq!(exchange.response, ProtocolResponse::Error("error: bad command".to_string()));
    }

    #[tokio::test]
    async fn test_line_split_across_reads() {
        let mock = Builder::new().write(b"$X\n").read(b"[MSG:Caution: ").read(b"Unlocked]\r\no").read(b"k\n").build();
        let mut link = LineLink::new(mock);
        let exchange = link.exchange("$X").await.unwrap();
        assert_eq!(exchange.response, ProtocolResponse::Ok);
        assert_eq!(exchange.info, vec!["[MSG:Caution: Unlocked]"]);
    }

    #[tokio::test]
    async fn test_end_of_stream_is_a_fault() {
        let mock = Builder::new().write(b"G91\n").build();
        let mut link = LineLink::new(mock);
        assert!(matches!(link.exchange("G91").await, Err(HardwareError::Closed)));
    }

    #[tokio::test]
    async fn test_read_error_is_a_fault() {
        let mock = Builder::new()
            .write(b"G91\n")
            .read_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged"))
            .build();
        let mut link = LineLink::new(mock);
        assert!(matches!(link.exchange("G91").await, Err(HardwareError::Io(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_drains_banner() {
        let (client, mut controller) = tokio::io::duplex(256);
        let mut link = LineLink::new(client);
        let fake = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut buf = [0u8; 4];
            controller.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"\r\n\r\n");
            controller.write_all(b"\r\nGrbl 1.1h ['$' for help]\r\n").await.unwrap();
            controller
        });
        let banner = link
            .wake(Duration::from_millis(10), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(banner, vec!["Grbl 1.1h ['$' for help]"]);
        drop(fake.await.unwrap());
    }
}
