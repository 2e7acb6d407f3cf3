//! Interactive command shell and event printer.

use std::io::Write;
use std::sync::Arc;

use tokio::sync::mpsc;

use peerchat_services::{
    AdmissionError, ConnectError, ConnectionId, OperationError, PeerEvent, TransportError,
};
use peerchatd::PeerManager;

const HELP: &str = "
Available Commands:
==================
help                                  - display this help information
myip                                  - display the IP address of this process
myport                                - display the port this process is listening on
connect <destination> <port>          - connect to a peer at the specified IP and port
list                                  - list all active connections
terminate <connection id>             - terminate the specified connection
send <connection id> <message>        - send a message to the specified connection
exit                                  - close all connections and exit the application
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    MyIp,
    MyPort,
    Connect { host: String, port: u16 },
    List,
    Terminate(ConnectionId),
    Send { id: ConnectionId, text: String },
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Usage - {0}")]
    Usage(&'static str),
    #[error("Port must be a valid number")]
    BadPort,
    #[error("Connection ID must be a number")]
    BadId,
    #[error("Unknown command: {0}. Type 'help' for available commands.")]
    Unknown(String),
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, ParseError> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match name.to_lowercase().as_str() {
        "help" => Command::Help,
        "myip" => Command::MyIp,
        "myport" => Command::MyPort,
        "list" => Command::List,
        "exit" => Command::Exit,
        "connect" => {
            let [host, port, ..] = args.as_slice() else {
                return Err(ParseError::Usage("connect <destination> <port>"));
            };
            Command::Connect {
                host: host.to_string(),
                port: port.parse().map_err(|_| ParseError::BadPort)?,
            }
        }
        "terminate" => {
            let Some(id) = args.first() else {
                return Err(ParseError::Usage("terminate <connection id>"));
            };
            Command::Terminate(id.parse().map_err(|_| ParseError::BadId)?)
        }
        "send" => {
            let [id, words @ ..] = args.as_slice() else {
                return Err(ParseError::Usage("send <connection id> <message>"));
            };
            if words.is_empty() {
                return Err(ParseError::Usage("send <connection id> <message>"));
            }
            Command::Send {
                id: id.parse().map_err(|_| ParseError::BadId)?,
                text: words.join(" "),
            }
        }
        _ => return Err(ParseError::Unknown(name.to_string())),
    };
    Ok(Some(command))
}

pub fn prompt() {
    print!(">>> ");
    let _ = std::io::stdout().flush();
}

/// Stdin lines on a dedicated thread. A blocking read inside the runtime
/// would keep it from shutting down.
pub fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Read and execute commands until `exit` or end of input.
pub async fn run(manager: Arc<PeerManager>, mut lines: mpsc::UnboundedReceiver<String>) {
    prompt();
    while let Some(line) = lines.recv().await {
        match parse_command(&line) {
            Ok(None) => {}
            Ok(Some(Command::Exit)) => return,
            Ok(Some(command)) => execute(&manager, command).await,
            Err(e) => match e {
                ParseError::Unknown(_) => println!("{e}"),
                _ => println!("Error: {e}"),
            },
        }
        prompt();
    }
}

async fn execute(manager: &PeerManager, command: Command) {
    match command {
        Command::Help => println!("{HELP}"),
        Command::MyIp => println!("My IP: {}", manager.my_ip()),
        Command::MyPort => println!("My Port: {}", manager.my_port()),
        Command::Connect { host, port } => {
            println!("Attempting to connect to {host}:{port}...");
            match manager.connect(&host, port).await {
                Ok(id) => println!("Successfully connected to {host}:{port} (ID: {id})"),
                Err(e) => print_connect_error(&host, port, &e),
            }
        }
        Command::List => {
            let links = manager.list().await;
            if links.is_empty() {
                println!("No active connections");
                return;
            }
            println!("\nid: IP address          Port No.");
            println!("{}", "=".repeat(40));
            for link in links {
                println!("{:2}: {:<20} {}", link.id, link.ip.to_string(), link.port);
            }
            println!();
        }
        Command::Terminate(id) => match manager.terminate(id).await {
            Ok(Some(info)) => println!("Connection {id} ({info}) terminated"),
            Ok(None) => println!("Connection {id} was already closed"),
            Err(e) => print_operation_error(&e),
        },
        Command::Send { id, text } => match manager.send(id, &text).await {
            Ok(()) => println!("Message sent to {id}"),
            Err(e) => print_operation_error(&e),
        },
        Command::Exit => {}
    }
}

fn print_connect_error(host: &str, port: u16, err: &ConnectError) {
    match err {
        ConnectError::Admission(AdmissionError::SelfConnection) => {
            println!("Error: Cannot connect to yourself");
        }
        ConnectError::Admission(AdmissionError::CapacityExceeded { limit }) => {
            println!("Error: Maximum of {limit} connections allowed");
        }
        ConnectError::Admission(AdmissionError::DuplicateConnection { .. }) => {
            println!("Error: Already connected to {host}:{port}");
        }
        ConnectError::Transport(TransportError::ConnectTimeout { .. }) => {
            println!("Error: Connection to {host}:{port} timed out");
            println!("Possible issues:");
            println!("  - Peer is not running on {host}:{port}");
            println!("  - Firewall is blocking the connection");
            println!("  - Machines are not on the same network");
        }
        ConnectError::Transport(TransportError::ConnectionRefused { .. }) => {
            println!("Error: Connection refused by {host}:{port}");
            println!("  - Is the peer running? Try: peerchatd {port}");
            println!("  - Check the port number is correct");
        }
        ConnectError::Transport(TransportError::AddressUnresolvable { .. }) => {
            println!("Error: Could not resolve address {host}");
            println!("  - Check the IP address is correct");
        }
        ConnectError::Transport(TransportError::ConnectFailed { source, .. }) => {
            println!("Error: Unable to connect to {host}:{port}");
            println!("  - Details: {source}");
            println!("  - Try: ping {host}");
        }
        ConnectError::ShuttingDown => println!("Error: {err}"),
    }
}

fn print_operation_error(err: &OperationError) {
    match err {
        OperationError::UnknownConnection(id) => {
            println!("Error: Connection {id} does not exist");
        }
        OperationError::MessageTooLong { max, .. } => {
            println!("Error: Message cannot exceed {max} characters");
        }
        OperationError::SendFailed { source, .. } => {
            println!("Error: Failed to send message - {source}");
        }
    }
}

/// Print peer events as they arrive, re-drawing the prompt after each.
pub async fn print_events(mut events: mpsc::UnboundedReceiver<PeerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::NewConnection(peer) => {
                println!("\n[New connection] {peer} (ID: {})", peer.id);
            }
            PeerEvent::Chat { peer, content } => {
                println!("\nMessage received from {}", peer.ip);
                println!("Sender's Port: {}", peer.port);
                println!("Message: \"{content}\"");
            }
            PeerEvent::PeerDisconnected(peer) => {
                println!("\n[Connection closed] {peer} has disconnected");
            }
            PeerEvent::ConnectionLost { peer, reason } => {
                println!("\n[Connection lost] {peer} (ID: {}): {reason}", peer.id);
            }
            PeerEvent::Error { context, message } => {
                println!("\n[Error] {context}: {message}");
            }
        }
        prompt();
    }
}
