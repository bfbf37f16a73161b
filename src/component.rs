//! Defines the Component trait for processing stages that run on their own
//! thread. A component consumes values from an input channel, converts each
//! one and passes the result on, which is how captured trials are handed to
//! worker threads for alignment and scoring.

use log::{info, warn};
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};

/// A stage that converts values one at a time. All state it needs lives in
/// the component itself, so it can be moved onto a worker thread.
pub trait Component: ToString {
    /// What the component consumes
    type InData;
    /// What the component produces
    type OutData;

    /// Converts one input into one output
    fn convert(&mut self, input: Self::InData) -> Self::OutData;

    /// Cleans up once the input channel is closed
    fn finalize(&mut self) {}
}

/// Runs the given Component on its own thread. On receiving data of type
/// InData on the input channel, the Component converts them to data of type
/// OutData and sends it to the output channel. The thread ends when every
/// sender of the input channel has been dropped.
pub fn run_component<C: Component + Send + 'static>(
    mut component: Box<C>,
    input: Receiver<C::InData>,
    output: Sender<C::OutData>,
) -> JoinHandle<()>
where
    C::InData: Send + 'static,
    C::OutData: Send + 'static,
{
    thread::spawn(move || {
        while let Ok(data) = input.recv() {
            let out_data = component.convert(data);
            if output.send(out_data).is_err() {
                warn!("{} : output closed, dropping remaining input.", component.to_string());
                break;
            }
        }

        component.finalize();
        info!("{} : terminated.", component.to_string());
    })
}
