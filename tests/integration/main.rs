mod gc_tests;
mod helpers;
mod memoization_tests;
mod process_tests;
mod session_tests;
mod validation_tests;
