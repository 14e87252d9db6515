use anyhow::{Context, Result};
use chrono::Utc;
use uuid::Uuid;

use miride::PgPool;
use miride::cars_repo::CarsRepository;
use miride::config::AppConfig;
use miride::rentals::{RentalActor, RentalStatus, available_transitions};
use miride::rentals_repo::RentalsRepository;
use miride::users::User;
use miride::users_repo::UsersRepository;

fn describe_user(label: &str, user: Option<&User>, id: Uuid) {
    match user {
        Some(user) => println!(
            "{:<10} {} <{}> ({}, {})",
            label,
            user.full_name(),
            user.email,
            user.role.as_str(),
            if user.is_active { "active" } else { "inactive" }
        ),
        None => println!("{:<10} {} (missing)", label, id),
    }
}

fn cents(amount: i32) -> String {
    format!("{}.{:02}", amount / 100, amount % 100)
}

/// Debug view of one rental: parties, money, next steps and what a
/// cancellation right now would refund
pub async fn handle_inspect_rental(pool: PgPool, rental_id: Uuid) -> Result<()> {
    let config = AppConfig::for_maintenance()?;
    let rentals_repo = RentalsRepository::new(pool.clone());
    let cars_repo = CarsRepository::new(pool.clone());
    let users_repo = UsersRepository::new(pool);

    let rental = rentals_repo
        .get_by_id(rental_id)
        .await?
        .with_context(|| format!("Rental {} not found", rental_id))?;
    let car = cars_repo.get_by_id(rental.car_id).await?;
    let customer = users_repo.get_by_id(rental.customer_id).await?;
    let owner = users_repo.get_by_id(rental.owner_id).await?;

    println!("Rental     {}", rental.id);
    println!(
        "Status     {} (payment {})",
        rental.status,
        rental.payment_status.as_str()
    );
    match &car {
        Some(car) => println!(
            "Car        {} [{}] in {}",
            car.display_name(),
            car.license_plate,
            car.location
        ),
        None => println!("Car        {} (missing)", rental.car_id),
    }
    describe_user("Customer", customer.as_ref(), rental.customer_id);
    describe_user("Owner", owner.as_ref(), rental.owner_id);
    println!(
        "Dates      {} to {} ({} days)",
        rental.start_date, rental.end_date, rental.days
    );
    println!(
        "Money      subtotal {} {} / commission {} / owner payout {} / refunded {}",
        cents(rental.subtotal_cents),
        rental.currency.to_uppercase(),
        cents(rental.commission_cents),
        cents(rental.owner_payout_cents),
        cents(rental.refund_amount_cents)
    );
    if let Some(session_id) = &rental.stripe_checkout_session_id {
        println!("Checkout   {}", session_id);
    }
    if let Some(payment_intent_id) = &rental.stripe_payment_intent_id {
        println!("Payment    {}", payment_intent_id);
    }
    if let Some(refund_id) = &rental.stripe_refund_id {
        println!("Refund     {}", refund_id);
    }
    if let Some(reason) = rental
        .rejection_reason
        .as_ref()
        .or(rental.cancellation_reason.as_ref())
    {
        println!("Reason     {}", reason);
    }

    println!();
    for (label, actor) in [
        ("customer", RentalActor::Customer),
        ("owner", RentalActor::Owner),
        ("admin", RentalActor::Admin),
    ] {
        let next: Vec<&str> = available_transitions(&rental, actor)
            .iter()
            .map(RentalStatus::as_str)
            .collect();
        println!(
            "Next ({:<8}) {}",
            label,
            if next.is_empty() {
                "-".to_string()
            } else {
                next.join(", ")
            }
        );
    }

    if !rental.status.is_terminal() {
        let now = Utc::now();
        println!();
        for (label, actor) in [
            ("customer", RentalActor::Customer),
            ("owner", RentalActor::Owner),
        ] {
            let quote = config.refund_policy.quote(&rental, actor, now);
            println!(
                "Cancel now by {:<8} refund {} -> payment {}, owner keeps {}",
                label,
                cents(quote.refund_cents),
                quote.payment_status.as_str(),
                cents(quote.owner_payout_cents)
            );
        }
    }

    Ok(())
}
