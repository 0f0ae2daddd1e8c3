//! Interface module tests.

mod construction_test;
