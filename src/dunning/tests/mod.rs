mod common;

mod rules;
