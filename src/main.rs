fn main() {
    if let Err(e) = kyc_risk_lib::run() {
        eprintln!("kyc-risk: {e}");
        std::process::exit(1);
    }
}
