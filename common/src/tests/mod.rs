mod envelope;
mod session;
