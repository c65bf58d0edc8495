mod common;

mod calculator;
