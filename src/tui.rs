//! Utilities for terminal output during scanning.

/// Prints a warning. Silent in greppable mode, uncoloured in accessible mode.
#[macro_export]
macro_rules! warning {
    ($name:expr) => {
        println!("{} {}", ::colored::Colorize::bold(::colored::Colorize::red("[!]")), $name);
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        // if not greppable then print, otherwise no else statement so do not print.
        if !$greppable {
            if $accessible {
                // Don't print the ascii art
                println!("{}", $name);
            } else {
                println!("{} {}", ::colored::Colorize::bold(::colored::Colorize::red("[!]")), $name);
            }
        }
    };
}

/// Prints a status line.
#[macro_export]
macro_rules! detail {
    ($name:expr) => {
        println!("{} {}", ::colored::Colorize::bold(::colored::Colorize::blue("[~]")), $name);
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", ::colored::Colorize::bold(::colored::Colorize::blue("[~]")), $name);
            }
        }
    };
}

/// Prints a result line.
#[macro_export]
macro_rules! output {
    ($name:expr) => {
        println!("{} {}", ::colored::Colorize::bold(::colored::Colorize::green("[>]")), $name);
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", ::colored::Colorize::bold(::colored::Colorize::green("[>]")), $name);
            }
        }
    };
}
