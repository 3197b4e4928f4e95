//! Integration tests for vidserve
//!
//! Each test binds the real server on an ephemeral loopback port and talks
//! raw HTTP/1.x to it over TCP, with scripted probe and transcode fakes
//! standing in for ffprobe and ffmpeg.

#[path = "integration/support.rs"]
mod support;

#[path = "integration/keep_alive.rs"]
mod keep_alive;
#[path = "integration/range_serving.rs"]
mod range_serving;
#[path = "integration/directory_listing.rs"]
mod directory_listing;
#[path = "integration/transcode_jobs.rs"]
mod transcode_jobs;
