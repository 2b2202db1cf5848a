pub mod session_tools;
