pub mod legged;
