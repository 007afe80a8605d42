/*!
    asynchronous EasyNet bus master in `std` environment.

    The central resource is the [Station] struct which owns the unit table and runs the bus schedule over a [Transport]. The transport provided here is [Link], a pair of queues fed by a driver future over any async byte stream, typically a serial port opened with [open_port].

    Loco, turnout and configuration state is not kept here: the station acts on it through the [Layout] trait, and reports unit and loco changes through the [Events] trait.

    usage sketch

    ```ignore
    let link = Arc::new(Link::new(&config));
    let (rx, tx) = open_port("/dev/ttyS1", config.rate)?;
    let mut station = Station::new(link.clone(), layout, (), config);
    let stop = Stopper::new();
    (
        async { link.run(rx, tx).await.unwrap() },
        station.run(&stop),
    ).race().await;
    ```
*/

/// bus timing and limits
mod config;
/// transport capability used by the station
mod transport;
/// transport implementation over async byte streams, this is the tricky part of the code
mod link;
/// external collaborators
mod layout;
/// scheduling of polls, status broadcasts and discovery
mod station;
/// handlers of messages received from units
mod dispatch;
/// firmware update session
mod update;


pub use config::*;
pub use transport::*;
pub use link::*;
pub use layout::*;
pub use station::*;
pub use update::Updater;


use crate::hex::HexError;
use thiserror::Error;

/// error regarding easynet communication
#[derive(Error, Debug)]
pub enum Error {
    #[error("problem with uart bus")]
    Bus(std::io::Error),
    #[error("problem detected on master side")]
    Master(&'static str),
    #[error("no data arrived in expected time")]
    Timeout,
    #[error("transmit queue stayed full")]
    QueueFull,
    #[error("invalid firmware file: {0}")]
    Hex(HexError),
}
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Bus(error)
    }
}
impl From<HexError> for Error {
    fn from(error: HexError) -> Self {
        Self::Hex(error)
    }
}
