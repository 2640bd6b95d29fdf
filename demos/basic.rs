use resilient_http::{Request, ResilientClient, RetryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::var("RESILIENT_HTTP_URL")?;
    let client = ResilientClient::new(RetryConfig::from_env()?)?;

    let mut request = Request::get(&url)?;
    if let Ok(token) = std::env::var("RESILIENT_HTTP_TOKEN") {
        request = request.bearer_auth(token)?;
    }

    let response = client.execute(request).await?;
    for attempt in response.attempts() {
        println!(
            "attempt {} -> {:?} (waited {:?})",
            attempt.number, attempt.status, attempt.waited
        );
    }
    println!("{}", response.text());

    client.close();
    Ok(())
}
