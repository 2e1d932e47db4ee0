// Console presentation - Terminal rendering of telemetry, alerts and commands
use crate::application::command_channel::CommandChannel;
use crate::application::telemetry_sink::{AlertNotification, AlertNotifier, TelemetrySink};
use crate::domain::alert::AlertRule;
use crate::domain::command::OutboundCommand;
use crate::domain::telemetry::{MetricUpdate, TelemetrySample};
use std::io::{BufRead, Write};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
pub struct ConsoleSink;

impl TelemetrySink for ConsoleSink {
    fn on_connection(&self, connected: bool) {
        if connected {
            println!("Connected to relay");
        } else {
            println!("Disconnected - waiting for the OBD device and relay to come back");
        }
    }

    fn on_update(&self, update: &MetricUpdate, sample: &TelemetrySample) {
        let metric = update.metric;
        let at = sample.received_at().unwrap_or(update.received_at);
        println!(
            "{} {:<22} {:>9.1} {}",
            at.format("%H:%M:%S"),
            metric.label(),
            update.value,
            metric.unit()
        );
    }

    fn on_alert_flag(&self, rule: &AlertRule, active: bool, value: f64) {
        if active {
            println!("[ALERT] {} ({}{})", rule.title(), value, rule.metric.unit());
        } else {
            println!("[ok] {} back to {}{}", rule.metric.label(), value, rule.metric.unit());
        }
    }

    fn on_command(&self, command: OutboundCommand) {
        println!("Lights set to: {}", command);
    }
}

#[derive(Debug, Default)]
pub struct TerminalNotifier;

impl AlertNotifier for TerminalNotifier {
    fn sound_alarm(&self) {
        let mut stderr = std::io::stderr();
        if let Err(e) = stderr.write_all(b"\x07").and_then(|_| stderr.flush()) {
            tracing::warn!("Alarm bell failed: {}", e);
        }
    }

    fn notify(&self, notification: &AlertNotification) {
        tracing::warn!("{}: {}", notification.title, notification.message);
        println!("!!!! {} !!!!", notification.title.to_uppercase());
        println!("     {}", notification.message);
    }
}

/// Read stdin on a plain thread so a pending read never holds up runtime
/// shutdown.
pub fn spawn_stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Dispatch each input line as a command token until the input ends.
pub async fn run_command_prompt(commands: CommandChannel, mut lines: mpsc::UnboundedReceiver<String>) {
    let tokens: Vec<&str> = OutboundCommand::ALL.iter().map(|c| c.as_str()).collect();
    println!("Commands: {}", tokens.join(", "));

    while let Some(line) = lines.recv().await {
        let token = line.trim();
        if token.is_empty() {
            continue;
        }
        match commands.dispatch(token) {
            Ok(receipt) if !receipt.written => {
                println!("Not connected, {} was not sent", receipt.command);
            }
            Ok(_) => {}
            Err(e) => println!("{}", e),
        }
    }
}
