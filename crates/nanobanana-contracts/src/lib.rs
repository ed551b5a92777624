pub mod decode;
pub mod extract;
pub mod gemini;
pub mod history;
pub mod naming;
pub mod response;
pub mod session;
