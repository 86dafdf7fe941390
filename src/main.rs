fn main() {
    send_to_crm_lib::run()
}
