fn main() {
    aurora::run_cli();
}
