mod consistency;
mod dead_letter;
mod pipeline;
