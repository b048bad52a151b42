#[cfg(unix)]
mod executor;
