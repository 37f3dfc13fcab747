//! Asynchronous cover-art resolution.
//!
//! The UI posts `(location, kind)` requests to a worker thread, which
//! opens the container in pictures mode and streams the embedded image
//! back. Requests and responses ride SPSC channels; dropping the server
//! winds the worker down.

use std::thread;

use crossbeam::channel::{unbounded, Receiver, Sender};

use encore_demux::demuxer::{self, OpenMode};
use encore_demux::info::{Image, ImageKind};

pub struct ImageRequest {
    pub location: String,
    pub kind: ImageKind,
}

pub struct ImageResponse {
    pub location: String,
    pub image: Option<Image>,
}

pub struct ImageServer {
    requests: Sender<ImageRequest>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ImageServer {
    pub fn spawn() -> (Self, Receiver<ImageResponse>) {
        let (requests, request_queue) = unbounded::<ImageRequest>();
        let (responses, response_queue) = unbounded();

        let thread = thread::Builder::new()
            .name("encore-images".to_owned())
            .spawn(move || {
                while let Ok(request) = request_queue.recv() {
                    let image = resolve_image(&request.location, request.kind);
                    let response = ImageResponse {
                        location: request.location,
                        image,
                    };
                    if responses.send(response).is_err() {
                        break;
                    }
                }
            })
            .expect("failed to spawn the image server thread");

        (
            ImageServer {
                requests,
                thread: Some(thread),
            },
            response_queue,
        )
    }

    pub fn request(&self, location: impl Into<String>, kind: ImageKind) {
        let _ = self.requests.send(ImageRequest {
            location: location.into(),
            kind,
        });
    }
}

impl Drop for ImageServer {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        let (closed, _) = unbounded();
        self.requests = closed;
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn resolve_image(location: &str, kind: ImageKind) -> Option<Image> {
    let mut demuxer = match demuxer::resolve(location, OpenMode::PICTURES) {
        Ok(demuxer) => demuxer,
        Err(e) => {
            log::debug!("cannot open {location:?} for pictures: {e}");
            return None;
        }
    };

    match demuxer.get_image(kind) {
        Ok(image) => image.filter(|i| !i.is_empty()),
        Err(e) => {
            log::debug!("cannot read cover art from {location:?}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn missing_files_resolve_to_no_image() {
        let (server, responses) = ImageServer::spawn();
        server.request("/nonexistent/nocover.m4a", ImageKind::FrontCover);

        let response = responses.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(response.location, "/nonexistent/nocover.m4a");
        assert!(response.image.is_none());
    }
}
