/**
 * @file
 * @brief TCP front end of the coordination executive. One listener,
 * one thread per connection, the executive lock held for the whole
 * handling of each message.
 *
 * A connection starts unjoined. A join binds it to one federate; a
 * resign reverts it to unjoined so the same connection can destroy the
 * federation or join again. When a joined connection dies the federate
 * is forcibly removed.
 */
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, info, warn};

use crate::errors::FederationError;
use crate::executive::{Executive, JoinedIdentity};
use crate::message::MessageKind;
use crate::wire;

pub struct Server {
    port: String,
}

impl Server {
    pub fn create_server(port: String) -> Server {
        Server { port }
    }

    /// Bind and serve until the process exits.
    pub fn serve(&self, executive: Executive) -> Result<(), FederationError> {
        let mut address = String::from("0.0.0.0:");
        address.push_str(self.port.as_str());
        let listener = TcpListener::bind(&address)?;
        info!("coordination service listening on {}", address);
        Self::serve_listener(listener, executive)
    }

    pub(crate) fn serve_listener(
        listener: TcpListener,
        executive: Executive,
    ) -> Result<(), FederationError> {
        let shared = Arc::new(Mutex::new(executive));
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let peer = match stream.peer_addr() {
                        Ok(address) => address.to_string(),
                        Err(_) => String::from("unknown peer"),
                    };
                    info!("accepted connection from {}", peer);
                    let cloned = Arc::clone(&shared);
                    thread::spawn(move || {
                        if let Err(e) = Self::serve_connection(stream, cloned) {
                            warn!("connection from {} failed: {}", peer, e);
                        }
                    });
                }
                Err(e) => warn!("failed to accept a connection: {}", e),
            }
        }
        Ok(())
    }

    fn serve_connection(
        mut stream: TcpStream,
        executive: Arc<Mutex<Executive>>,
    ) -> Result<(), FederationError> {
        let mut identity: Option<JoinedIdentity> = None;
        let result = Self::drive(&mut stream, &executive, &mut identity);
        if let Some(joined) = identity {
            let mut locked = executive.lock().unwrap();
            locked.kill_federate(joined.federation, joined.federate);
            info!(
                "removed federate {} of federation {} after its connection ended",
                joined.federate, joined.federation
            );
        }
        result
    }

    fn drive(
        stream: &mut TcpStream,
        executive: &Arc<Mutex<Executive>>,
        identity: &mut Option<JoinedIdentity>,
    ) -> Result<(), FederationError> {
        loop {
            let msg = match wire::read_message(stream) {
                Ok(msg) => msg,
                Err(FederationError::Io(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    debug!("peer closed the connection");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            let mut locked = executive.lock().unwrap();
            match *identity {
                None => {
                    *identity = locked.process_pre_join(&msg, stream)?;
                }
                Some(joined) => {
                    match locked.process(joined.federation, joined.federate, &msg) {
                        Ok(()) => {
                            if msg.kind() == MessageKind::ResignFederationExecution {
                                *identity = None;
                            }
                        }
                        // a protocol or transport failure ends the connection,
                        // a domain rejection does not
                        Err(e @ FederationError::Protocol(_))
                        | Err(e @ FederationError::Io(_)) => return Err(e),
                        Err(e) => {
                            warn!(
                                "rejected {:?} from federate {}: {}",
                                msg.kind(),
                                joined.federate,
                                e
                            );
                        }
                    }
                }
            }
        }
    }
}
