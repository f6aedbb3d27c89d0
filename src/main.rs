fn main() {
    std::process::exit(screen_recorder::run());
}
